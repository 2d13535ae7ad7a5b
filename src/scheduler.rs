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

//! the static scheduling pipeline
//!
//! Drives the stages end to end: elaborate, explore, fragmentize,
//! generate a partitioned DAG and an object file per fragment, link,
//! and resolve. Every stage consumes only the outputs of earlier
//! stages; nothing calls back upward.

use crate::ast::Program;
use crate::dag::DagGenerator;
use crate::instance::{elaborate, InstanceTree};
use crate::pretvm::{
    Executable, Instruction, InstructionGenerator, Label, ObjectFile, Op, Operand, Reg,
    ResolvedProgram,
};
use crate::statespace::{
    connect_fragments_default, connect_fragments_guarded, fragmentize_init_and_periodic,
    ExplorationMode, FragmentId, Phase, StateSpaceExplorer, StateSpaceFragment,
};
use crate::time::{Tag, TimeValue};
use crate::Error;

/// Global knobs of one compilation.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of worker lanes the schedule is partitioned across.
    pub workers: usize,
    /// Program timeout; enables the shutdown phase and bounds
    /// exploration.
    pub timeout: Option<TimeValue>,
    /// Fast mode skips physical-time waits (`DU`) entirely.
    pub fast: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            workers: 1,
            timeout: None,
            fast: false,
        }
    }
}

/// Everything the backend hands to downstream emitters.
#[derive(Debug)]
pub struct CompiledSchedule {
    pub tree: InstanceTree,
    pub fragments: Vec<StateSpaceFragment>,
    pub executable: Executable,
    pub resolved: ResolvedProgram,
}

pub struct StaticScheduler {
    config: SchedulerConfig,
}

impl StaticScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        StaticScheduler { config }
    }

    /// Run the whole pipeline on a checked program.
    pub fn compile(&self, program: &Program) -> Result<CompiledSchedule, Error> {
        let tree = elaborate(program)?;

        let explorer = StateSpaceExplorer::new(&tree, self.config.timeout);
        let horizon = self.config.timeout.map_or(Tag::FOREVER, Tag::at);
        let diagram = explorer.explore(horizon, ExplorationMode::InitAndPeriodic)?;
        let hyperperiod = diagram.hyperperiod;

        let mut fragments = fragmentize_init_and_periodic(&diagram);

        // Without a timeout, a schedule that drains its event queue
        // (an acyclic diagram) falls into shutdown by starvation; the
        // fragment follows the last one unconditionally.
        if self.config.timeout.is_none() && !diagram.is_cyclic() {
            let starvation =
                explorer.explore(Tag::FOREVER, ExplorationMode::ShutdownStarvation)?;
            if !starvation.is_empty() {
                let from = fragments.len().checked_sub(1).map(FragmentId);
                fragments.push(StateSpaceFragment::new(starvation));
                let to = FragmentId(fragments.len() - 1);
                if let Some(from) = from {
                    connect_fragments_default(&mut fragments, from, to);
                }
            }
        }

        // With a timeout, the schedule needs the state at the shutdown
        // instant; it is entered from the last fragment once the global
        // offset passes the timeout register. A program with nothing to
        // schedule before the timeout gets the shutdown phase alone.
        if self.config.timeout.is_some() {
            let shutdown = explorer.explore(
                Tag::at(TimeValue::ZERO),
                ExplorationMode::ShutdownTimeout,
            )?;
            if !shutdown.is_empty() {
                let from = fragments.len().checked_sub(1).map(FragmentId);
                fragments.push(StateSpaceFragment::new(shutdown));
                let to = FragmentId(fragments.len() - 1);
                if let Some(from) = from {
                    connect_fragments_guarded(
                        &mut fragments,
                        from,
                        to,
                        vec![Instruction::new(Op::Bge {
                            rs1: Operand::Reg(Reg::GlobalOffset),
                            rs2: Operand::Reg(Reg::GlobalTimeout),
                            target: Label::Phase(Phase::ShutdownTimeout),
                        })],
                    );
                }
            }
        }

        let mut generator = InstructionGenerator::new(&tree, &self.config);
        let dag_generator = DagGenerator::new(&tree);
        let mut object_files: Vec<ObjectFile> = Vec::new();
        for (index, fragment) in fragments.iter().enumerate() {
            let mut dag = dag_generator.generate(&fragment.diagram);
            dag.partition(self.config.workers);
            object_files.push(generator.generate(
                &mut dag,
                FragmentId(index),
                fragment.phase(),
            )?);
        }

        let executable = generator.link(object_files, &fragments, hyperperiod)?;
        let resolved = generator.resolve(&executable)?;
        Ok(CompiledSchedule {
            tree,
            fragments,
            executable,
            resolved,
        })
    }
}
