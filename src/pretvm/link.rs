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

//! linking object files into one executable, and final emission

use std::collections::{HashMap, HashSet, VecDeque};

use itertools::Itertools;

use crate::statespace::{is_default_transition, FragmentId, Phase, StateSpaceFragment};
use crate::time::TimeValue;
use crate::Error;

use super::instruction::{
    Executable, InstWord, Instruction, Label, ObjectFile, Op, Opcode, Operand, RawOperand, Reg,
    Relocation, ResolvedProgram, RuntimeAddr,
};
use super::InstructionGenerator;

impl<'a> InstructionGenerator<'a> {
    /// Link per-fragment object files into a single executable:
    /// preamble, fragment bodies in breadth-first transition order with
    /// their cloned transitions, epilogue, synchronization block.
    pub fn link(
        &mut self,
        object_files: Vec<ObjectFile>,
        fragments: &[StateSpaceFragment],
        hyperperiod: TimeValue,
    ) -> Result<Executable, Error> {
        let mut streams = self.generate_preamble();

        let mut by_fragment: HashMap<FragmentId, ObjectFile> = object_files
            .into_iter()
            .map(|o| (o.fragment, o))
            .collect();

        if let Some(first) = by_fragment.keys().min_by_key(|f| f.index()).copied() {
            assert!(
                fragments[first.index()].upstreams.is_empty(),
                "the first linked fragment must have no upstream"
            );
            let mut queue = VecDeque::from([first]);
            let mut seen: HashSet<FragmentId> = HashSet::from([first]);
            while let Some(id) = queue.pop_front() {
                let object = by_fragment.remove(&id).expect("every fragment has an object file");
                let fragment = &fragments[id.index()];
                let mut body = object.streams;

                // Guarded transitions first, the default transition
                // last. Clones per worker: labels resolve per worker.
                let mut default_transition: Option<&[Instruction]> = None;
                for transition in &fragment.downstreams {
                    if is_default_transition(&transition.instructions) {
                        if default_transition.is_some() {
                            return Err(Error::DuplicateDefaultTransition {
                                phase: object.phase.to_string(),
                            });
                        }
                        default_transition = Some(&transition.instructions);
                        continue;
                    }
                    for stream in body.iter_mut() {
                        stream.extend(transition.instructions.iter().cloned());
                    }
                }
                if let Some(default) = default_transition {
                    for stream in body.iter_mut() {
                        stream.extend(default.iter().cloned());
                    }
                }

                // The fragment entry point is its phase label.
                for stream in body.iter_mut() {
                    stream
                        .first_mut()
                        .expect("fragment bodies are never empty")
                        .set_label(Label::Phase(object.phase));
                }

                for (worker, stream) in body.into_iter().enumerate() {
                    streams[worker].extend(stream);
                }

                for transition in &fragment.downstreams {
                    if let Some(downstream) = transition.to {
                        if seen.insert(downstream) {
                            queue.push_back(downstream);
                        }
                    }
                }
            }
        }
        assert!(by_fragment.is_empty(), "unreachable fragments were generated");

        for (worker, stream) in self.generate_epilogue().into_iter().enumerate() {
            streams[worker].extend(stream);
        }
        for (worker, stream) in self.generate_sync_block().into_iter().enumerate() {
            streams[worker].extend(stream);
        }

        log::debug!(
            "linked executable: {:?} instructions per worker, hyperperiod {}",
            streams.iter().map(|s| s.len()).collect::<Vec<_>>(),
            hyperperiod
        );
        Ok(Executable {
            streams,
            hyperperiod,
        })
    }

    /// Worker 0 initializes the global registers from the externally
    /// provided start time; every worker then enters the sync block.
    fn generate_preamble(&mut self) -> Vec<Vec<Instruction>> {
        let mut streams = Vec::new();
        for worker in 0..self.workers {
            let mut stream = Vec::new();
            if worker == 0 {
                stream.push(Instruction::new(Op::Addi {
                    dst: Reg::GlobalOffset,
                    src: Reg::ExternStartTime,
                    imm: 0,
                }));
                if let Some(timeout) = self.timeout {
                    stream.push(Instruction::new(Op::Addi {
                        dst: Reg::GlobalTimeout,
                        src: Reg::ExternStartTime,
                        imm: timeout.to_nanoseconds(),
                    }));
                }
                stream.push(Instruction::new(Op::Addi {
                    dst: Reg::GlobalOffsetInc,
                    src: Reg::GlobalZero,
                    imm: 0,
                }));
            }
            stream.push(Instruction::new(Op::Jal {
                link: Reg::WorkerReturnAddr(Some(worker)),
                target: Label::Phase(Phase::SyncBlock),
            }));
            stream[0].set_label(Label::Phase(Phase::Preamble));
            streams.push(stream);
        }
        streams
    }

    fn generate_epilogue(&mut self) -> Vec<Vec<Instruction>> {
        (0..self.workers)
            .map(|_| vec![Instruction::labeled(Op::Stp, Label::Phase(Phase::Epilogue))])
            .collect()
    }

    /// The reusable barrier between hyperperiods. Worker 0 waits for
    /// every other worker to post, advances the global offset by the
    /// increment, resets the counters, advances every reactor's tag,
    /// and releases; the others post and spin until released.
    fn generate_sync_block(&mut self) -> Vec<Vec<Instruction>> {
        let mut streams = Vec::new();
        for w in 0..self.workers {
            let mut stream = Vec::new();
            if w == 0 {
                for worker in 1..self.workers {
                    stream.push(Instruction::new(Op::Wu {
                        var: Reg::WorkerBinarySema(Some(worker)),
                        value: 1,
                    }));
                }
                stream.push(Instruction::new(Op::Add {
                    dst: Reg::GlobalOffset,
                    src1: Reg::GlobalOffset,
                    src2: Reg::GlobalOffsetInc,
                }));
                for worker in 0..self.workers {
                    stream.push(Instruction::new(Op::Addi {
                        dst: Reg::WorkerCounter(Some(worker)),
                        src: Reg::GlobalZero,
                        imm: 0,
                    }));
                }
                for reactor in self.tree.reactor_ids() {
                    let stem =
                        format!("ADVANCE_TAG_{}", self.tree.reactor_label_name(reactor));
                    let label = self.fresh_label(&stem);
                    self.note_placeholder(w, label.clone(), RuntimeAddr::ReactorSelf(reactor));
                    stream.push(Instruction::labeled(
                        Op::Advi {
                            reactor,
                            base: Reg::GlobalOffset,
                            imm: 0,
                        },
                        label,
                    ));
                }
                for worker in 1..self.workers {
                    stream.push(Instruction::new(Op::Addi {
                        dst: Reg::WorkerBinarySema(Some(worker)),
                        src: Reg::GlobalZero,
                        imm: 0,
                    }));
                }
                stream.push(Instruction::new(Op::Jalr {
                    link: Reg::GlobalZero,
                    base: Reg::WorkerReturnAddr(Some(0)),
                    imm: 0,
                }));
            } else {
                stream.push(Instruction::new(Op::Addi {
                    dst: Reg::WorkerBinarySema(Some(w)),
                    src: Reg::GlobalZero,
                    imm: 1,
                }));
                stream.push(Instruction::new(Op::Wlt {
                    var: Reg::WorkerBinarySema(Some(w)),
                    value: 1,
                }));
                stream.push(Instruction::new(Op::Jalr {
                    link: Reg::GlobalZero,
                    base: Reg::WorkerReturnAddr(Some(w)),
                    imm: 0,
                }));
            }
            stream[0].set_label(Label::Phase(Phase::SyncBlock));
            streams.push(stream);
        }
        streams
    }

    /// Final emission: resolve labels to line numbers per worker,
    /// rewrite register operands to runtime variable names, and record
    /// placeholder relocations for `initialize_static_schedule()`.
    pub fn resolve(&self, executable: &Executable) -> Result<ResolvedProgram, Error> {
        let mut workers = Vec::new();
        let mut relocations = Vec::new();

        for (worker, stream) in executable.streams.iter().enumerate() {
            // First pass: labels become line numbers; uniqueness per
            // worker is an emission invariant.
            let mut lines: HashMap<&Label, usize> = HashMap::new();
            for (line, instruction) in stream.iter().enumerate() {
                if let Some(label) = &instruction.label {
                    let previous = lines.insert(label, line);
                    assert!(
                        previous.is_none(),
                        "duplicate label '{}' on worker {}",
                        label,
                        worker
                    );
                }
            }

            let resolve_target = |label: &Label| -> i64 {
                *lines
                    .get(label)
                    .unwrap_or_else(|| panic!("undefined branch target '{}' on worker {}", label, worker))
                    as i64
            };
            let var = |reg: &Reg| RawOperand::Var(reg.var_name(worker));

            // Second pass: encode operands.
            let mut words = Vec::new();
            for (line, instruction) in stream.iter().enumerate() {
                let placeholder = |op: &mut Vec<Relocation>| -> Result<RawOperand, Error> {
                    let label = instruction.label.clone().ok_or_else(|| {
                        Error::UnresolvedPlaceholder {
                            worker,
                            label: "<unlabeled>".into(),
                        }
                    })?;
                    let addr = self.placeholder_maps[worker].get(&label).copied().ok_or_else(
                        || Error::UnresolvedPlaceholder {
                            worker,
                            label: label.to_string(),
                        },
                    )?;
                    op.push(Relocation {
                        worker,
                        line,
                        symbol: self.env_symbol(addr),
                    });
                    Ok(RawOperand::Placeholder)
                };
                let branch_operand = |operand: &Operand,
                                      relocations: &mut Vec<Relocation>|
                 -> Result<RawOperand, Error> {
                    match operand {
                        Operand::Reg(r) => Ok(var(r)),
                        Operand::TriggerPresence(_) => {
                            let label = instruction.label.clone().ok_or_else(|| {
                                Error::UnresolvedPlaceholder {
                                    worker,
                                    label: "<unlabeled>".into(),
                                }
                            })?;
                            let addr = self.placeholder_maps[worker]
                                .get(&label)
                                .copied()
                                .ok_or_else(|| Error::UnresolvedPlaceholder {
                                    worker,
                                    label: label.to_string(),
                                })?;
                            relocations.push(Relocation {
                                worker,
                                line,
                                symbol: self.env_symbol(addr),
                            });
                            Ok(RawOperand::Placeholder)
                        }
                    }
                };

                let word = match &instruction.op {
                    Op::Add { dst, src1, src2 } => InstWord {
                        opcode: Opcode::Add,
                        op1: var(dst),
                        op2: var(src1),
                        op3: var(src2),
                    },
                    Op::Addi { dst, src, imm } => InstWord {
                        opcode: Opcode::Addi,
                        op1: var(dst),
                        op2: var(src),
                        op3: RawOperand::Imm(*imm),
                    },
                    Op::Adv { reactor, base, inc } => InstWord {
                        opcode: Opcode::Adv,
                        op1: RawOperand::Imm(reactor.index() as i64),
                        op2: var(base),
                        op3: var(inc),
                    },
                    Op::Advi { base, imm, .. } => InstWord {
                        opcode: Opcode::Advi,
                        op1: placeholder(&mut relocations)?,
                        op2: var(base),
                        op3: RawOperand::Imm(*imm),
                    },
                    Op::Beq { rs1, rs2, target } => InstWord {
                        opcode: Opcode::Beq,
                        op1: branch_operand(rs1, &mut relocations)?,
                        op2: branch_operand(rs2, &mut relocations)?,
                        op3: RawOperand::Imm(resolve_target(target)),
                    },
                    Op::Bne { rs1, rs2, target } => InstWord {
                        opcode: Opcode::Bne,
                        op1: branch_operand(rs1, &mut relocations)?,
                        op2: branch_operand(rs2, &mut relocations)?,
                        op3: RawOperand::Imm(resolve_target(target)),
                    },
                    Op::Blt { rs1, rs2, target } => InstWord {
                        opcode: Opcode::Blt,
                        op1: branch_operand(rs1, &mut relocations)?,
                        op2: branch_operand(rs2, &mut relocations)?,
                        op3: RawOperand::Imm(resolve_target(target)),
                    },
                    Op::Bge { rs1, rs2, target } => InstWord {
                        opcode: Opcode::Bge,
                        op1: branch_operand(rs1, &mut relocations)?,
                        op2: branch_operand(rs2, &mut relocations)?,
                        op3: RawOperand::Imm(resolve_target(target)),
                    },
                    Op::Bit { target } => InstWord {
                        opcode: Opcode::Bit,
                        op1: RawOperand::Imm(resolve_target(target)),
                        op2: RawOperand::None,
                        op3: RawOperand::None,
                    },
                    Op::Du { base, until } => InstWord {
                        opcode: Opcode::Du,
                        op1: var(base),
                        op2: RawOperand::Imm(until.to_nanoseconds()),
                        op3: RawOperand::None,
                    },
                    Op::Eit { reaction } => InstWord {
                        opcode: Opcode::Eit,
                        op1: RawOperand::Imm(reaction.index() as i64),
                        op2: RawOperand::Imm(-1),
                        op3: RawOperand::None,
                    },
                    Op::Exe { .. } => InstWord {
                        opcode: Opcode::Exe,
                        op1: placeholder(&mut relocations)?,
                        op2: RawOperand::None,
                        op3: RawOperand::None,
                    },
                    Op::Inc2 { dst, imm } => InstWord {
                        opcode: Opcode::Inc2,
                        op1: var(dst),
                        op2: var(dst),
                        op3: RawOperand::Imm(*imm),
                    },
                    Op::Jal { link, target } => InstWord {
                        opcode: Opcode::Jal,
                        op1: var(link),
                        op2: RawOperand::Imm(resolve_target(target)),
                        op3: RawOperand::None,
                    },
                    Op::Jalr { link, base, imm } => InstWord {
                        opcode: Opcode::Jalr,
                        op1: var(link),
                        op2: var(base),
                        op3: RawOperand::Imm(*imm),
                    },
                    Op::Stp => InstWord {
                        opcode: Opcode::Stp,
                        op1: RawOperand::None,
                        op2: RawOperand::None,
                        op3: RawOperand::None,
                    },
                    Op::Wu { var: v, value } => InstWord {
                        opcode: Opcode::Wu,
                        op1: RawOperand::Var(v.var_name(worker)),
                        op2: RawOperand::Imm(*value as i64),
                        op3: RawOperand::None,
                    },
                    Op::Wlt { var: v, value } => InstWord {
                        opcode: Opcode::Wlt,
                        op1: RawOperand::Var(v.var_name(worker)),
                        op2: RawOperand::Imm(*value as i64),
                        op3: RawOperand::None,
                    },
                };
                words.push(word);
            }
            workers.push(words);
        }

        log::trace!(
            "resolved program:\n{}",
            executable
                .streams
                .iter()
                .enumerate()
                .map(|(w, s)| format!("worker {}:\n  {}", w, s.iter().join("\n  ")))
                .join("\n")
        );
        Ok(ResolvedProgram {
            workers,
            relocations,
            hyperperiod: executable.hyperperiod.to_nanoseconds(),
        })
    }
}
