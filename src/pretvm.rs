// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! PretVM code generation and linking
//!
//! Per-fragment instruction generation walks the partitioned DAG and
//! emits one instruction stream per worker; the linker concatenates the
//! per-fragment object files along the fragment transition graph and
//! wraps them with the preamble, the epilogue, and the synchronization
//! block that implements hyperperiod-based periodic execution.

use std::collections::HashMap;

use crate::instance::{InstanceTree, TriggerKey};

mod generator;
mod instruction;
mod link;

pub use instruction::{
    Executable, InstWord, Instruction, Label, ObjectFile, Op, Opcode, Operand, RawOperand, Reg,
    Relocation, ResolvedProgram, RuntimeAddr, WorkerId,
};

/// Generates PretVM object files from partitioned DAGs and links them
/// into an executable. One generator spans a whole compilation: label
/// uniqueness and the placeholder maps are per-compilation state, never
/// process-global.
pub struct InstructionGenerator<'a> {
    tree: &'a InstanceTree,
    workers: usize,
    timeout: Option<crate::time::TimeValue>,
    fast: bool,
    /// Monotone suffix source for generated labels.
    label_counter: u64,
    /// Per-worker map from an instruction's label to the runtime
    /// address that replaces its placeholder operand.
    placeholder_maps: Vec<HashMap<Label, RuntimeAddr>>,
    /// Position of every trigger in the runtime's flat trigger table.
    trigger_index: HashMap<TriggerKey, usize>,
}

impl<'a> InstructionGenerator<'a> {
    pub fn new(tree: &'a InstanceTree, config: &crate::scheduler::SchedulerConfig) -> Self {
        let trigger_index = tree
            .trigger_table()
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i))
            .collect();
        InstructionGenerator {
            tree,
            workers: config.workers,
            timeout: config.timeout,
            fast: config.fast,
            label_counter: 0,
            placeholder_maps: vec![HashMap::new(); config.workers],
            trigger_index,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// A label guaranteed unique within this compilation.
    fn fresh_label(&mut self, stem: &str) -> Label {
        let label = Label::Text(format!("{}_{}", stem, self.label_counter));
        self.label_counter += 1;
        label
    }

    fn note_placeholder(&mut self, worker: WorkerId, label: Label, addr: RuntimeAddr) {
        let previous = self.placeholder_maps[worker].insert(label.clone(), addr);
        assert!(
            previous.is_none(),
            "placeholder label '{}' reused on worker {}",
            label,
            worker
        );
    }

    /// Render a recorded runtime address against the environment layout.
    fn env_symbol(&self, addr: RuntimeAddr) -> String {
        match addr {
            RuntimeAddr::ReactorSelf(r) => {
                format!("envs[0].reactor_self_array[{}]", r.index())
            }
            RuntimeAddr::ReactionFunction(x) => {
                format!("envs[0].reaction_array[{}]", x.index())
            }
            RuntimeAddr::TriggerPresence(t) => {
                format!("envs[0].pqueue_heads[{}]", self.trigger_index[&t])
            }
        }
    }
}
