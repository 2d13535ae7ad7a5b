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

//! per-fragment instruction generation over the partitioned DAG

use std::collections::HashMap;

use crate::dag::Dag;
use crate::instance::{ReactorId, TriggerKey};
use crate::statespace::{FragmentId, Phase};
use crate::time::TimeValue;
use crate::Error;

use super::instruction::{Instruction, Label, ObjectFile, Op, Operand, Reg, RuntimeAddr};
use super::InstructionGenerator;

impl<'a> InstructionGenerator<'a> {
    /// Walk the partitioned DAG in topological order and emit one
    /// instruction stream per worker for this fragment.
    ///
    /// Per REACTION node: cross-worker waits, a tag advance when the
    /// node's reactor moves to a new SYNC boundary, the guarded-execute
    /// pattern, and the counter increment that publishes the node's
    /// release value. The tail SYNC emits the hand-off to the sync
    /// block unless it carries no real-time constraint
    /// (`TimeValue::MAX`).
    pub fn generate(
        &mut self,
        dag: &mut Dag,
        fragment: FragmentId,
        phase: Phase,
    ) -> Result<ObjectFile, Error> {
        dag.assign_release_values(self.workers)?;

        let mut streams: Vec<Vec<Instruction>> = vec![Vec::new(); self.workers];
        // Timeout cancellation: every fragment opens by routing to the
        // epilogue once the timeout flag is set.
        for stream in streams.iter_mut() {
            stream.push(Instruction::new(Op::Bit {
                target: Label::Phase(Phase::Epilogue),
            }));
        }

        // Last SYNC boundary each reactor advanced to, to avoid
        // duplicating ADVI/DU for every reaction of the same reactor.
        let mut reactor_last_sync: HashMap<ReactorId, petgraph::graph::NodeIndex> = HashMap::new();

        for idx in dag.topological_sort()? {
            let node = dag.node(idx).clone();
            if let Some(reaction_id) = node.reaction() {
                let worker = node.worker.expect("generate requires a partitioned DAG");
                let reactor = self.tree.reaction(reaction_id).owner;

                // Wait for upstream reactions owned by other workers.
                for upstream in dag.upstream_reactions(idx) {
                    let up = dag.node(upstream);
                    let owner = up.worker.expect("upstream reaction is partitioned");
                    if owner != worker {
                        streams[worker].push(Instruction::new(Op::Wu {
                            var: Reg::WorkerCounter(Some(owner)),
                            value: up.release_value.expect("release values assigned"),
                        }));
                    }
                }

                // Advance this reactor's tag when it crosses into a new
                // SYNC boundary; the head boundary is handled by the
                // preceding sync-block pass.
                let sync = node.associated_sync.expect("reaction has a SYNC");
                if reactor_last_sync.get(&reactor) != Some(&sync) {
                    reactor_last_sync.insert(reactor, sync);
                    if Some(sync) != dag.head {
                        let sync_time = dag
                            .node(sync)
                            .sync_time()
                            .expect("associated sync node is a SYNC");
                        let stem = format!(
                            "ADVANCE_TAG_{}",
                            self.tree.reactor_label_name(reactor)
                        );
                        let label = self.fresh_label(&stem);
                        self.note_placeholder(
                            worker,
                            label.clone(),
                            RuntimeAddr::ReactorSelf(reactor),
                        );
                        streams[worker].push(Instruction::labeled(
                            Op::Advi {
                                reactor,
                                base: Reg::GlobalOffset,
                                imm: sync_time.to_nanoseconds(),
                            },
                            label,
                        ));
                        if !self.fast {
                            streams[worker].push(Instruction::new(Op::Du {
                                base: Reg::GlobalOffset,
                                until: sync_time,
                            }));
                        }
                    }
                }

                // Guarded execute: triggers with a runtime presence flag
                // gate the EXE; with no guard satisfied, control skips
                // over it to the labeled counter increment.
                let stem = format!("EXECUTE_{}", self.tree.reaction_label_name(reaction_id));
                let exe_label = self.fresh_label(&stem);
                self.note_placeholder(
                    worker,
                    exe_label.clone(),
                    RuntimeAddr::ReactionFunction(reaction_id),
                );
                let guards: Vec<TriggerKey> = self
                    .tree
                    .reaction(reaction_id)
                    .triggers
                    .iter()
                    .copied()
                    .filter(|t| self.has_presence_flag(*t))
                    .collect();
                for trigger in &guards {
                    let stem = format!(
                        "TEST_TRIGGER_{}",
                        self.tree.trigger_label_name(*trigger)
                    );
                    let label = self.fresh_label(&stem);
                    self.note_placeholder(
                        worker,
                        label.clone(),
                        RuntimeAddr::TriggerPresence(*trigger),
                    );
                    streams[worker].push(Instruction::labeled(
                        Op::Beq {
                            rs1: Operand::TriggerPresence(*trigger),
                            rs2: Operand::Reg(Reg::GlobalOne),
                            target: exe_label.clone(),
                        },
                        label,
                    ));
                }

                let post_exe_label = self.fresh_label("ONE_LINE_AFTER_EXE");
                if !guards.is_empty() {
                    streams[worker].push(Instruction::new(Op::Jal {
                        link: Reg::GlobalZero,
                        target: post_exe_label.clone(),
                    }));
                }
                streams[worker].push(Instruction::labeled(
                    Op::Exe { reaction: reaction_id },
                    exe_label,
                ));
                // Publishes the release value to waiters.
                streams[worker].push(Instruction::labeled(
                    Op::Addi {
                        dst: Reg::WorkerCounter(Some(worker)),
                        src: Reg::WorkerCounter(Some(worker)),
                        imm: 1,
                    },
                    post_exe_label,
                ));
            } else if Some(idx) == dag.tail {
                let time = node.sync_time().expect("DAG tail is a SYNC");
                // A tail at TimeValue::MAX ends an acyclic schedule
                // without real-time constraints: no hand-off is needed.
                if time == TimeValue::MAX {
                    continue;
                }
                for (worker, stream) in streams.iter_mut().enumerate() {
                    if !self.fast {
                        stream.push(Instruction::new(Op::Du {
                            base: Reg::GlobalOffset,
                            until: time,
                        }));
                    }
                    if worker == 0 {
                        stream.push(Instruction::new(Op::Addi {
                            dst: Reg::GlobalOffsetInc,
                            src: Reg::GlobalZero,
                            imm: time.to_nanoseconds(),
                        }));
                    }
                    stream.push(Instruction::new(Op::Jal {
                        link: Reg::WorkerReturnAddr(Some(worker)),
                        target: Label::Phase(Phase::SyncBlock),
                    }));
                }
            }
        }

        log::debug!(
            "fragment {} ({}): {:?} instructions per worker",
            fragment,
            phase,
            streams.iter().map(|s| s.len()).collect::<Vec<_>>()
        );
        Ok(ObjectFile {
            fragment,
            phase,
            streams,
        })
    }

    /// Input ports and actions carry a runtime is-present flag; timers
    /// and the builtin triggers are always present when scheduled.
    fn has_presence_flag(&self, trigger: TriggerKey) -> bool {
        match trigger {
            TriggerKey::Port(p) => self.tree.port(p).is_input(),
            TriggerKey::Action(_) => true,
            TriggerKey::Startup(_) | TriggerKey::Shutdown(_) | TriggerKey::Timer(_) => false,
        }
    }
}
