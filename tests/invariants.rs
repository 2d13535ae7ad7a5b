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

//! cross-cutting invariants checked over a family of programs

mod common;

use std::collections::HashSet;

use anyhow::Result;
use tidal::ast::Program;
use tidal::{
    elaborate, CompiledSchedule, Label, Op, Opcode, RawOperand, SchedulerConfig, StaticScheduler,
    TimeValue,
};

fn programs() -> Vec<Program> {
    vec![
        common::single_timer(),
        common::priority_chain(3),
        common::after_delay(),
        common::physical_action(),
        common::microstep_pair(),
    ]
}

fn compile_all(workers: usize) -> Result<Vec<CompiledSchedule>> {
    common::init_logging();
    programs()
        .iter()
        .map(|p| {
            Ok(StaticScheduler::new(SchedulerConfig {
                workers,
                timeout: Some(TimeValue::new(60 * common::SEC)),
                ..Default::default()
            })
            .compile(p)?)
        })
        .collect()
}

/// Every connection endpoint is owned by the declaring reactor or one
/// of its immediate children.
#[test]
fn connection_endpoints_resolve_locally() {
    for program in &programs() {
        let tree = elaborate(program).unwrap();
        for rid in tree.reactor_ids() {
            let reactor = tree.reactor(rid);
            for conn in &reactor.connections {
                for port in [conn.source, conn.destination] {
                    let owner = tree.port(port).owner;
                    assert!(
                        owner == rid || reactor.children.contains(&owner),
                        "port {} escapes reactor {}",
                        tree.port_full_name(port),
                        tree.reactor_full_name(rid)
                    );
                }
            }
        }
    }
}

/// Declaration order threads the priority chain both ways.
#[test]
fn priority_chains_are_symmetric() {
    for program in &programs() {
        let tree = elaborate(program).unwrap();
        for rid in tree.reactor_ids() {
            let reactions = &tree.reactor(rid).reactions;
            for pair in reactions.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                assert!(tree.reaction(next).depends_on_reactions.contains(&prev));
                assert!(tree.reaction(prev).dependent_reactions.contains(&next));
            }
        }
    }
}

/// Per worker, label strings are unique and every branch target is a
/// defined label.
#[test]
fn labels_unique_and_targets_defined() -> Result<()> {
    for schedule in compile_all(2)? {
        for stream in &schedule.executable.streams {
            let mut defined: HashSet<&Label> = HashSet::new();
            for instruction in stream {
                if let Some(label) = &instruction.label {
                    assert!(defined.insert(label), "duplicate label '{}'", label);
                }
            }
            for instruction in stream {
                let target = match &instruction.op {
                    Op::Beq { target, .. }
                    | Op::Bne { target, .. }
                    | Op::Blt { target, .. }
                    | Op::Bge { target, .. }
                    | Op::Bit { target }
                    | Op::Jal { target, .. } => Some(target),
                    _ => None,
                };
                if let Some(target) = target {
                    assert!(defined.contains(target), "dangling branch target '{}'", target);
                }
            }
        }
    }
    Ok(())
}

/// Every placeholder operand in the emitted words has a relocation
/// entry, and every worker halts through the epilogue's STP.
#[test]
fn placeholders_resolved_and_streams_halt() -> Result<()> {
    for schedule in compile_all(2)? {
        for (worker, words) in schedule.resolved.workers.iter().enumerate() {
            for (line, word) in words.iter().enumerate() {
                if word.op1 == RawOperand::Placeholder {
                    assert!(
                        schedule
                            .resolved
                            .relocations
                            .iter()
                            .any(|r| r.worker == worker && r.line == line),
                        "placeholder at worker {} line {} has no relocation",
                        worker,
                        line
                    );
                }
            }
            let stops = words.iter().filter(|w| w.opcode == Opcode::Stp).count();
            assert_eq!(stops, 1, "exactly one STP (the epilogue) per worker");
        }
        for relocation in &schedule.resolved.relocations {
            assert!(relocation.symbol.starts_with("envs[0]."));
        }
    }
    Ok(())
}

/// A detected loop over advancing timestamps has a positive
/// hyperperiod equal to the tag distance between the two visits.
#[test]
fn hyperperiod_matches_loop_tags() {
    use tidal::{ExplorationMode, StateSpaceExplorer, Tag};
    for program in &programs() {
        let tree = elaborate(program).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        if let (Some(loop_node), Some(next)) = (diagram.loop_node, diagram.loop_node_next.as_ref())
        {
            assert_eq!(
                next.tag.time - diagram.node(loop_node).tag.time,
                diagram.hyperperiod
            );
            if next.tag.time > diagram.node(loop_node).tag.time {
                assert!(diagram.hyperperiod > TimeValue::ZERO);
            }
        }
    }
}

/// Topological sort succeeds on every generated DAG, and every
/// REACTION node has exactly one associated SYNC.
#[test]
fn dags_sort_and_reactions_have_syncs() {
    use tidal::{
        fragmentize_init_and_periodic, DagGenerator, DagKind, ExplorationMode, StateSpaceExplorer,
        Tag,
    };
    for program in &programs() {
        let tree = elaborate(program).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        for fragment in fragmentize_init_and_periodic(&diagram) {
            let dag = DagGenerator::new(&tree).generate(&fragment.diagram);
            let order = dag.topological_sort().unwrap();
            assert_eq!(order.len(), dag.graph.node_count());
            for idx in dag.graph.node_indices() {
                if dag.node(idx).is_reaction() {
                    let sync = dag.node(idx).associated_sync.expect("reaction has a SYNC");
                    assert!(matches!(dag.node(sync).kind, DagKind::Sync(_)));
                }
            }
        }
    }
}

/// For same-tag priority pairs split across workers, the publishing
/// ADDI exists on the upstream worker and the downstream worker's WU
/// waits for it before its EXE.
#[test]
fn counting_locks_pair_up() -> Result<()> {
    let schedule = StaticScheduler::new(SchedulerConfig { workers: 2, ..Default::default() })
        .compile(&common::priority_chain(2))?;
    let w0 = &schedule.resolved.workers[0];
    let w1 = &schedule.resolved.workers[1];
    let publishes = w0
        .iter()
        .filter(|w| {
            w.opcode == Opcode::Addi
                && w.op1 == RawOperand::Var("counters[0]".into())
                && w.op2 == RawOperand::Var("counters[0]".into())
        })
        .count();
    assert!(publishes >= 1, "worker 0 publishes its counter");
    let wu = w1
        .iter()
        .position(|w| w.opcode == Opcode::Wu && w.op1 == RawOperand::Var("counters[0]".into()))
        .expect("worker 1 waits on worker 0");
    let exe = w1.iter().position(|w| w.opcode == Opcode::Exe).unwrap();
    assert!(wu < exe);
    Ok(())
}

/// Elaboration and the whole pipeline are idempotent.
#[test]
fn pipeline_is_idempotent() -> Result<()> {
    for program in &programs() {
        let a = elaborate(program).unwrap();
        let b = elaborate(program).unwrap();
        assert_eq!(a, b);
        let config = SchedulerConfig { workers: 2, ..Default::default() };
        let first = StaticScheduler::new(config.clone()).compile(program)?;
        let second = StaticScheduler::new(config).compile(program)?;
        assert_eq!(first.resolved, second.resolved);
    }
    Ok(())
}
