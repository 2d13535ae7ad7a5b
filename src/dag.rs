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

//! partitioned precedence DAG of reaction invocations
//!
//! A state-space fragment lowers to a DAG whose SYNC nodes mark logical
//! time boundaries, DUMMY nodes carry the delay between consecutive
//! boundaries, and REACTION nodes carry the invocations. Edges encode
//! everything the emitted code must respect: intra-reactor priority,
//! and determinism-preserving order between invocations of the same
//! reaction (or reactor) across consecutive steps.

use petgraph::algo::toposort;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Direction;

use crate::instance::{InstanceTree, ReactionId};
use crate::pretvm::WorkerId;
use crate::statespace::{Phase, StateSpaceDiagram};
use crate::time::TimeValue;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DagKind {
    /// A logical time boundary, at a time relative to the fragment's
    /// phase start.
    Sync(TimeValue),
    /// The delay between two consecutive SYNC nodes.
    Dummy(TimeValue),
    Reaction(ReactionId),
}

#[derive(Clone, Debug)]
pub struct DagNode {
    pub kind: DagKind,
    /// Worker lane, set by partitioning; only REACTION nodes carry one.
    pub worker: Option<WorkerId>,
    /// Monotone per-worker counting-lock value, set after partitioning.
    pub release_value: Option<u64>,
    /// Nearest upstream SYNC node; every REACTION node has exactly one.
    pub associated_sync: Option<NodeIndex>,
}

impl DagNode {
    pub fn reaction(&self) -> Option<ReactionId> {
        match self.kind {
            DagKind::Reaction(r) => Some(r),
            _ => None,
        }
    }

    pub fn sync_time(&self) -> Option<TimeValue> {
        match self.kind {
            DagKind::Sync(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_reaction(&self) -> bool {
        matches!(self.kind, DagKind::Reaction(_))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Dag {
    pub graph: Graph<DagNode, ()>,
    /// The first SYNC node.
    pub head: Option<NodeIndex>,
    /// The final SYNC node.
    pub tail: Option<NodeIndex>,
}

impl Dag {
    pub fn new() -> Self {
        Dag::default()
    }

    pub fn add_sync(&mut self, time: TimeValue) -> NodeIndex {
        self.graph.add_node(DagNode {
            kind: DagKind::Sync(time),
            worker: None,
            release_value: None,
            associated_sync: None,
        })
    }

    pub fn add_dummy(&mut self, duration: TimeValue) -> NodeIndex {
        self.graph.add_node(DagNode {
            kind: DagKind::Dummy(duration),
            worker: None,
            release_value: None,
            associated_sync: None,
        })
    }

    pub fn add_reaction(&mut self, reaction: ReactionId, sync: NodeIndex) -> NodeIndex {
        self.graph.add_node(DagNode {
            kind: DagKind::Reaction(reaction),
            worker: None,
            release_value: None,
            associated_sync: Some(sync),
        })
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }

    pub fn node(&self, idx: NodeIndex) -> &DagNode {
        &self.graph[idx]
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// REACTION nodes immediately upstream of a node.
    pub fn upstream_reactions(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter(|n| self.graph[*n].is_reaction())
            .collect()
    }

    /// A topological order over all nodes. Failure means the upstream
    /// stages produced a cyclic graph, which is a compiler bug.
    pub fn topological_sort(&self) -> Result<Vec<NodeIndex>, Error> {
        toposort(&self.graph, None).map_err(|_| Error::UnsortableDag)
    }

    /// Assign REACTION nodes to workers. Any assignment respecting the
    /// DAG is correct; round-robin in creation order keeps the output
    /// deterministic.
    pub fn partition(&mut self, workers: usize) {
        assert!(workers > 0, "need at least one worker");
        let mut next = 0;
        for idx in self.graph.node_indices() {
            if self.graph[idx].is_reaction() {
                self.graph[idx].worker = Some(next % workers);
                next += 1;
            }
        }
    }

    /// Render the DAG for inspection.
    pub fn to_graphviz(&self, tree: &InstanceTree) -> String {
        use petgraph::dot::{Config, Dot};

        let binding = |_, node: (NodeIndex, &DagNode)| match node.1.kind {
            DagKind::Sync(t) => format!("label=\"SYNC@{}\"; shape=diamond", t),
            DagKind::Dummy(d) => format!("label=\"DUMMY {}\"; shape=box", d),
            DagKind::Reaction(r) => format!(
                "label=\"{}\nworker {:?} release {:?}\"",
                tree.reaction_full_name(r),
                node.1.worker,
                node.1.release_value
            ),
        };
        let generator = Dot::with_attr_getters(
            &self.graph,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, _| String::new(),
            &binding,
        );
        format!("{:?}", generator)
    }

    /// Walk the topological order and give each worker's REACTION nodes
    /// monotonically increasing release values (1, 2, 3, ...).
    pub fn assign_release_values(&mut self, workers: usize) -> Result<(), Error> {
        let order = self.topological_sort()?;
        let mut counters = vec![0u64; workers];
        for idx in order {
            if self.graph[idx].is_reaction() {
                let worker = self.graph[idx]
                    .worker
                    .expect("release values require a partitioned DAG");
                counters[worker] += 1;
                self.graph[idx].release_value = Some(counters[worker]);
            }
        }
        Ok(())
    }
}

/// Lowers a state-space diagram into a DAG.
pub struct DagGenerator<'a> {
    tree: &'a InstanceTree,
}

impl<'a> DagGenerator<'a> {
    pub fn new(tree: &'a InstanceTree) -> Self {
        DagGenerator { tree }
    }

    pub fn generate(&self, diagram: &StateSpaceDiagram) -> Dag {
        let mut dag = Dag::new();
        if diagram.is_empty() {
            return dag;
        }

        // SYNC times are relative to the phase start: the periodic
        // phase begins at its loop node, every other phase at zero.
        let head_idx = diagram.head.expect("non-empty diagram has a head");
        let phase_offset = match diagram.phase {
            Phase::Periodic => diagram.node(head_idx).tag.time,
            _ => TimeValue::ZERO,
        };

        let mut current = Some(head_idx);
        let mut previous_time = TimeValue::ZERO;
        let mut previous_sync: Option<NodeIndex> = None;
        let mut loop_node_visits = 0;

        // REACTION nodes awaiting a downstream SYNC edge, and awaiting
        // a same-reactor successor edge, across steps.
        let mut unconnected_to_sync: Vec<NodeIndex> = Vec::new();
        let mut unconnected_to_next_invocation: Vec<NodeIndex> = Vec::new();

        while let Some(idx) = current {
            let mut last_iteration = false;
            if Some(idx) == diagram.loop_node {
                loop_node_visits += 1;
                if loop_node_visits >= 2 {
                    last_iteration = true;
                }
            }

            let time = if last_iteration {
                diagram.hyperperiod
            } else {
                diagram.node(idx).tag.time - phase_offset
            };

            let sync = self.add_sync_with_dummy(&mut dag, time, previous_time, previous_sync);

            if last_iteration {
                for n in unconnected_to_sync.drain(..) {
                    dag.add_edge(n, sync);
                }
                dag.tail = Some(sync);
                return dag;
            }

            let current_reactions: Vec<NodeIndex> = diagram
                .node(idx)
                .reactions_invoked
                .iter()
                .map(|&reaction| {
                    let node = dag.add_reaction(reaction, sync);
                    dag.add_edge(sync, node);
                    node
                })
                .collect();

            // Intra-reactor priority edges within this step.
            for &a in &current_reactions {
                for &b in &current_reactions {
                    let ra = dag.node(a).reaction().unwrap();
                    let rb = dag.node(b).reaction().unwrap();
                    if self.tree.reaction(rb).depends_on_reactions.contains(&ra) {
                        dag.add_edge(a, b);
                    }
                }
            }

            // A reaction invoked again in this step pins its previous
            // invocation to this SYNC, preserving deterministic order.
            let invoked_now = &diagram.node(idx).reactions_invoked;
            unconnected_to_sync.retain(|&n| {
                if invoked_now.contains(&dag.node(n).reaction().unwrap()) {
                    dag.add_edge(n, sync);
                    false
                } else {
                    true
                }
            });
            unconnected_to_sync.extend(&current_reactions);

            // Same-reactor invocations across consecutive steps stay
            // ordered.
            unconnected_to_next_invocation.retain(|&n| {
                let reactor = self.tree.reaction(dag.node(n).reaction().unwrap()).owner;
                let mut connected = false;
                for &m in &current_reactions {
                    if self.tree.reaction(dag.node(m).reaction().unwrap()).owner == reactor {
                        dag.add_edge(n, m);
                        connected = true;
                    }
                }
                !connected
            });
            unconnected_to_next_invocation.extend(&current_reactions);

            previous_sync = Some(sync);
            previous_time = time;
            current = diagram.downstream(idx);
        }

        // Acyclic diagram: close it with a final SYNC. A phase that
        // hands over to a successor (a non-zero span) gets a real time
        // boundary; a terminal phase gets TimeValue::MAX, which the
        // emitter treats as "no real-time constraint".
        let tail_time = if diagram.hyperperiod > TimeValue::ZERO {
            diagram.hyperperiod
        } else {
            TimeValue::MAX
        };
        let sync = if tail_time.is_forever() {
            let sync = dag.add_sync(tail_time);
            if let Some(p) = previous_sync {
                dag.add_edge(p, sync);
            }
            sync
        } else {
            self.add_sync_with_dummy(&mut dag, tail_time, previous_time, previous_sync)
        };
        for n in unconnected_to_sync.drain(..) {
            dag.add_edge(n, sync);
        }
        dag.tail = Some(sync);
        dag
    }

    fn add_sync_with_dummy(
        &self,
        dag: &mut Dag,
        time: TimeValue,
        previous_time: TimeValue,
        previous_sync: Option<NodeIndex>,
    ) -> NodeIndex {
        let sync = dag.add_sync(time);
        if dag.head.is_none() {
            dag.head = Some(sync);
        }
        if time != TimeValue::ZERO {
            if let Some(prev) = previous_sync {
                let dummy = dag.add_dummy(time - previous_time);
                dag.add_edge(prev, dummy);
                dag.add_edge(dummy, sync);
            }
        }
        sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EffectRef, PortRef, Program, ReactorClass, TriggerRef};
    use crate::instance::elaborate;
    use crate::statespace::{
        fragmentize_init_and_periodic, ExplorationMode, StateSpaceExplorer,
    };
    use crate::time::Tag;

    const SEC: i64 = 1_000_000_000;

    fn periodic_dag(program: &Program) -> (InstanceTree, Dag) {
        let tree = elaborate(program).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        let fragments = fragmentize_init_and_periodic(&diagram);
        let periodic = fragments
            .into_iter()
            .find(|f| f.phase() == Phase::Periodic)
            .expect("program loops");
        let dag = DagGenerator::new(&tree).generate(&periodic.diagram);
        (tree, dag)
    }

    fn single_timer_program() -> Program {
        let mut main = ReactorClass::new("Main");
        main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
        main.reaction(vec![TriggerRef::Timer("t".into())], vec![], vec![]);
        Program::new(main)
    }

    #[test]
    fn test_single_timer_dag_shape() {
        let (_, dag) = periodic_dag(&single_timer_program());
        let kinds: Vec<DagKind> = dag
            .graph
            .node_indices()
            .map(|n| dag.node(n).kind)
            .collect();
        // SYNC(0) and its REACTION, then the terminal SYNC(1s) with the
        // DUMMY carrying the period in between.
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0], DagKind::Sync(TimeValue::ZERO));
        assert!(matches!(kinds[1], DagKind::Reaction(_)));
        assert_eq!(kinds[2], DagKind::Sync(TimeValue::new(SEC)));
        assert_eq!(kinds[3], DagKind::Dummy(TimeValue::new(SEC)));
        assert_eq!(dag.node(dag.head.unwrap()).kind, DagKind::Sync(TimeValue::ZERO));
        assert_eq!(dag.node(dag.tail.unwrap()).kind, DagKind::Sync(TimeValue::new(SEC)));
        // The reaction is pinned to the terminal SYNC.
        let reaction_idx = dag
            .graph
            .node_indices()
            .find(|n| dag.node(*n).is_reaction())
            .unwrap();
        assert!(dag
            .graph
            .neighbors_directed(dag.tail.unwrap(), Direction::Incoming)
            .any(|n| n == reaction_idx));
    }

    #[test]
    fn test_priority_chain_edges() {
        let mut main = ReactorClass::new("Main");
        main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
        main.reaction(vec![TriggerRef::Timer("t".into())], vec![], vec![]);
        main.reaction(vec![TriggerRef::Timer("t".into())], vec![], vec![]);
        let (tree, dag) = periodic_dag(&Program::new(main));
        let r1 = tree.reactor(tree.main()).reactions[0];
        let r2 = tree.reactor(tree.main()).reactions[1];
        let n1 = dag
            .graph
            .node_indices()
            .find(|n| dag.node(*n).reaction() == Some(r1))
            .unwrap();
        let n2 = dag
            .graph
            .node_indices()
            .find(|n| dag.node(*n).reaction() == Some(r2))
            .unwrap();
        // SYNC -> r1, SYNC -> r2, r1 -> r2.
        let sync = dag.head.unwrap();
        assert!(dag.graph.find_edge(sync, n1).is_some());
        assert!(dag.graph.find_edge(sync, n2).is_some());
        assert!(dag.graph.find_edge(n1, n2).is_some());
        assert!(dag.graph.find_edge(n2, n1).is_none());
    }

    #[test]
    fn test_topological_sort_succeeds() {
        let (_, dag) = periodic_dag(&single_timer_program());
        let order = dag.topological_sort().unwrap();
        assert_eq!(order.len(), dag.graph.node_count());
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut dag = Dag::new();
        let a = dag.add_sync(TimeValue::ZERO);
        let b = dag.add_reaction(ReactionId(0), a);
        dag.add_edge(a, b);
        dag.add_edge(b, a);
        assert_eq!(dag.topological_sort().unwrap_err(), Error::UnsortableDag);
    }

    #[test]
    fn test_partition_and_release_values() {
        let mut main = ReactorClass::new("Main");
        main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
        for _ in 0..4 {
            main.reaction(vec![TriggerRef::Timer("t".into())], vec![], vec![]);
        }
        let (_, mut dag) = periodic_dag(&Program::new(main));
        dag.partition(2);
        dag.assign_release_values(2).unwrap();
        let mut per_worker: Vec<Vec<u64>> = vec![vec![], vec![]];
        for idx in dag.topological_sort().unwrap() {
            let node = dag.node(idx);
            if node.is_reaction() {
                per_worker[node.worker.unwrap()].push(node.release_value.unwrap());
            }
        }
        assert_eq!(per_worker[0], vec![1, 2]);
        assert_eq!(per_worker[1], vec![1, 2]);
    }

    #[test]
    fn test_graphviz_render() {
        let (tree, dag) = periodic_dag(&single_timer_program());
        let dot = dag.to_graphviz(&tree);
        assert!(dot.contains("SYNC@0ns"));
        assert!(dot.contains("DUMMY 1000000000ns"));
        assert!(dot.contains("main.reaction_1"));
    }

    #[test]
    fn test_every_reaction_has_associated_sync() {
        let (_, dag) = periodic_dag(&single_timer_program());
        for idx in dag.graph.node_indices() {
            if dag.node(idx).is_reaction() {
                let sync = dag.node(idx).associated_sync.unwrap();
                assert!(matches!(dag.node(sync).kind, DagKind::Sync(_)));
            }
        }
    }

    #[test]
    fn test_acyclic_fragment_gets_forever_tail() {
        let mut main = ReactorClass::new("Main");
        main.timer("once", TimeValue::new(5), TimeValue::ZERO);
        main.reaction(vec![TriggerRef::Timer("once".into())], vec![], vec![]);
        let tree = elaborate(&Program::new(main)).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        let fragments = fragmentize_init_and_periodic(&diagram);
        let dag = DagGenerator::new(&tree).generate(&fragments[0].diagram);
        // One reaction at (5, 0), then a terminal SYNC at forever with
        // no real-time constraint.
        assert_eq!(dag.node(dag.tail.unwrap()).kind, DagKind::Sync(TimeValue::MAX));
        let reactions: Vec<_> = dag
            .graph
            .node_indices()
            .filter(|n| dag.node(*n).is_reaction())
            .collect();
        assert_eq!(reactions.len(), 1);
        assert!(dag.graph.find_edge(reactions[0], dag.tail.unwrap()).is_some());
    }

    #[test]
    fn test_cross_step_determinism_edges() {
        // Same reaction invoked in two consecutive steps: the earlier
        // invocation must be pinned under the intermediate SYNC and
        // ordered before the later one.
        let mut producer = ReactorClass::new("Producer");
        producer.output("out", crate::ast::InferredType::Undefined);
        producer.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
        producer.reaction(
            vec![TriggerRef::Timer("t".into())],
            vec![],
            vec![EffectRef::Port(PortRef::local("out"))],
        );
        let mut consumer = ReactorClass::new("Consumer");
        consumer.input("inp", crate::ast::InferredType::Undefined);
        consumer.reaction(vec![TriggerRef::Port(PortRef::local("inp"))], vec![], vec![]);
        let mut main = ReactorClass::new("Main");
        main.child("a", "Producer").child("b", "Consumer");
        main.connect(crate::ast::ConnectionDecl::after(
            PortRef::of("a", "out"),
            PortRef::of("b", "inp"),
            TimeValue::new(SEC / 2),
        ));
        let mut program = Program::new(main);
        program.add_class(producer);
        program.add_class(consumer);
        let (tree, dag) = periodic_dag(&program);

        let producer_reaction = {
            let main_inst = tree.reactor(tree.main());
            tree.reactor(main_inst.children[0]).reactions[0]
        };
        let producer_node = dag
            .graph
            .node_indices()
            .find(|n| dag.node(*n).reaction() == Some(producer_reaction))
            .unwrap();
        // The producer recurs every period, so its invocation must be
        // pinned under a downstream SYNC boundary.
        let downstream_syncs: Vec<_> = dag
            .graph
            .neighbors_directed(producer_node, Direction::Outgoing)
            .filter(|n| matches!(dag.node(*n).kind, DagKind::Sync(_)))
            .collect();
        assert!(
            !downstream_syncs.is_empty(),
            "recurring reaction must be pinned to a downstream SYNC"
        );
    }
}
