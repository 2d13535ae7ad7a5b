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

//! discrete-event state space of a reactor program
//!
//! The explorer symbolically executes the program's event queue from a
//! start mode and records, per timestamp, which reactions are invoked
//! and what the queue looks like afterwards. Nodes hash on that state
//! independently of the tag, which is how a revisited logical state is
//! recognized as a loop and the hyperperiod is derived.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use itertools::Itertools;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Direction;

use crate::instance::{ReactionId, TriggerKey};
use crate::time::{Tag, TimeValue};

mod explorer;
mod fragment;

pub use explorer::{ExplorationMode, StateSpaceExplorer, DEFAULT_EXPLORATION_BOUND};
pub use fragment::{
    connect_fragments_default, connect_fragments_guarded, fragmentize_init_and_periodic,
    is_default_transition, FragmentId, FragmentTransition, StateSpaceFragment,
};

/// Execution phase a diagram, fragment, or linked code block belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    Init,
    Periodic,
    ShutdownTimeout,
    ShutdownStarvation,
    SyncBlock,
    Preamble,
    Epilogue,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::Periodic => "PERIODIC",
            Phase::ShutdownTimeout => "SHUTDOWN_TIMEOUT",
            Phase::ShutdownStarvation => "SHUTDOWN_STARVATION",
            Phase::SyncBlock => "SYNC_BLOCK",
            Phase::Preamble => "PREAMBLE",
            Phase::Epilogue => "EPILOGUE",
        };
        write!(f, "{}", name)
    }
}

/// A pending occurrence of a trigger at a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Event {
    pub trigger: TriggerKey,
    pub tag: Tag,
}

impl Event {
    pub fn new(trigger: TriggerKey, tag: Tag) -> Self {
        Event { trigger, tag }
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag
            .cmp(&other.tag)
            .then_with(|| self.trigger.cmp(&other.trigger))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of events ordered by tag, ties broken by insertion order.
/// An event identical to one already queued (same trigger, same tag) is
/// coalesced away.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<std::cmp::Reverse<(Tag, u64, TriggerKey)>>,
    queued: HashSet<Event>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    pub fn push(&mut self, event: Event) {
        if self.queued.insert(event) {
            self.heap
                .push(std::cmp::Reverse((event.tag, self.next_seq, event.trigger)));
            self.next_seq += 1;
        }
    }

    pub fn pop(&mut self) -> Option<Event> {
        let std::cmp::Reverse((tag, _, trigger)) = self.heap.pop()?;
        let event = Event::new(trigger, tag);
        self.queued.remove(&event);
        Some(event)
    }

    pub fn peek_tag(&self) -> Option<Tag> {
        self.heap.peek().map(|std::cmp::Reverse((tag, _, _))| *tag)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// A deterministic snapshot of everything queued, sorted by
    /// (tag, trigger).
    pub fn snapshot(&self) -> Vec<Event> {
        self.queued.iter().copied().sorted().collect()
    }
}

/// A finalized exploration state: everything invoked at one timestamp
/// plus the queue as it stood when the timestamp was done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSpaceNode {
    pub tag: Tag,
    pub reactions_invoked: std::collections::BTreeSet<ReactionId>,
    pub event_queue: Vec<Event>,
}

impl StateSpaceNode {
    /// Hash of the logical state, independent of the tag: the sorted
    /// reaction set and the sorted multiset of queued triggers. Two
    /// nodes with equal hashes represent the same recurring state.
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for reaction in &self.reactions_invoked {
            reaction.hash(&mut hasher);
        }
        for trigger in self.event_queue.iter().map(|e| e.trigger).sorted() {
            trigger.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Directed graph of state-space nodes in execution order, with the
/// loop bookkeeping needed to derive the hyperperiod.
#[derive(Clone, Debug)]
pub struct StateSpaceDiagram {
    graph: Graph<StateSpaceNode, ()>,
    pub head: Option<NodeIndex>,
    pub tail: Option<NodeIndex>,
    /// First repeated node, if a loop was found.
    pub loop_node: Option<NodeIndex>,
    /// The state reached on the second visit of the loop node. Kept out
    /// of the graph; only its tag matters for the hyperperiod.
    pub loop_node_next: Option<StateSpaceNode>,
    pub hyperperiod: TimeValue,
    pub phase: Phase,
    /// Exploration stopped at the horizon with events still queued.
    pub horizon_truncated: bool,
}

impl StateSpaceDiagram {
    pub fn new(phase: Phase) -> Self {
        StateSpaceDiagram {
            graph: Graph::new(),
            head: None,
            tail: None,
            loop_node: None,
            loop_node_next: None,
            hyperperiod: TimeValue::ZERO,
            phase,
            horizon_truncated: false,
        }
    }

    pub fn add_node(&mut self, node: StateSpaceNode) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Record that execution proceeds from `prev` to `next`.
    pub fn add_transition(&mut self, prev: NodeIndex, next: NodeIndex) {
        self.graph.add_edge(prev, next, ());
    }

    pub fn node(&self, idx: NodeIndex) -> &StateSpaceNode {
        &self.graph[idx]
    }

    /// The node execution proceeds to after `idx`, following the loop
    /// edge at the tail of a cyclic diagram.
    pub fn downstream(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Outgoing).next()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn is_cyclic(&self) -> bool {
        self.loop_node.is_some()
    }

    /// Render the diagram for inspection.
    pub fn to_graphviz(&self) -> String {
        use petgraph::dot::{Config, Dot};

        let generator = Dot::with_attr_getters(
            &self.graph,
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &|_, _| String::new(),
            &|_, node| {
                format!(
                    "label=\"{}\n{} reactions, {} queued\"",
                    node.1.tag,
                    node.1.reactions_invoked.len(),
                    node.1.event_queue.len()
                )
            },
        );
        format!("{:?}", generator)
    }

    /// Nodes from head to tail in execution order.
    pub fn iter_from_head(&self) -> DiagramWalk {
        DiagramWalk {
            diagram: self,
            current: self.head,
            visited: 0,
        }
    }
}

/// Walks the diagram from the head, stopping at the tail so the loop
/// edge does not make the walk cycle.
pub struct DiagramWalk<'a> {
    diagram: &'a StateSpaceDiagram,
    current: Option<NodeIndex>,
    visited: usize,
}

impl<'a> Iterator for DiagramWalk<'a> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let current = self.current?;
        self.visited += 1;
        if self.visited >= self.diagram.node_count() || Some(current) == self.diagram.tail {
            self.current = None;
        } else {
            self.current = self.diagram.downstream(current);
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{PortId, ReactionId, TimerId};

    fn event(trigger: TriggerKey, time: i64, microstep: u32) -> Event {
        Event::new(trigger, Tag::new(TimeValue::new(time), microstep))
    }

    #[test]
    fn test_queue_orders_by_tag() {
        let mut q = EventQueue::new();
        q.push(event(TriggerKey::Timer(TimerId(0)), 10, 0));
        q.push(event(TriggerKey::Port(PortId(0)), 5, 0));
        q.push(event(TriggerKey::Port(PortId(1)), 5, 1));
        assert_eq!(q.pop().unwrap().tag, Tag::new(TimeValue::new(5), 0));
        assert_eq!(q.pop().unwrap().tag, Tag::new(TimeValue::new(5), 1));
        assert_eq!(q.pop().unwrap().tag, Tag::new(TimeValue::new(10), 0));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_queue_coalesces_duplicates() {
        let mut q = EventQueue::new();
        q.push(event(TriggerKey::Timer(TimerId(0)), 10, 0));
        q.push(event(TriggerKey::Timer(TimerId(0)), 10, 0));
        assert_eq!(q.len(), 1);
        // Same trigger at a different tag is a distinct event.
        q.push(event(TriggerKey::Timer(TimerId(0)), 20, 0));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_queue_ties_broken_by_insertion_order() {
        let mut q = EventQueue::new();
        q.push(event(TriggerKey::Port(PortId(7)), 5, 0));
        q.push(event(TriggerKey::Port(PortId(3)), 5, 0));
        assert_eq!(q.pop().unwrap().trigger, TriggerKey::Port(PortId(7)));
        assert_eq!(q.pop().unwrap().trigger, TriggerKey::Port(PortId(3)));
    }

    #[test]
    fn test_state_hash_ignores_tag() {
        let reactions: std::collections::BTreeSet<_> = [ReactionId(0)].into_iter().collect();
        let a = StateSpaceNode {
            tag: Tag::at(TimeValue::ZERO),
            reactions_invoked: reactions.clone(),
            event_queue: vec![event(TriggerKey::Timer(TimerId(0)), 1_000, 0)],
        };
        let b = StateSpaceNode {
            tag: Tag::at(TimeValue::new(1_000)),
            reactions_invoked: reactions,
            event_queue: vec![event(TriggerKey::Timer(TimerId(0)), 2_000, 0)],
        };
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_graphviz_render() {
        let mut diagram = StateSpaceDiagram::new(Phase::Init);
        let idx = diagram.add_node(StateSpaceNode {
            tag: Tag::at(TimeValue::new(5)),
            reactions_invoked: [ReactionId(0)].into_iter().collect(),
            event_queue: vec![],
        });
        diagram.head = Some(idx);
        let dot = diagram.to_graphviz();
        assert!(dot.contains("(5ns, 0)"));
        assert!(dot.contains("1 reactions"));
    }

    #[test]
    fn test_state_hash_sees_reaction_set() {
        let a = StateSpaceNode {
            tag: Tag::at(TimeValue::ZERO),
            reactions_invoked: [ReactionId(0)].into_iter().collect(),
            event_queue: vec![],
        };
        let b = StateSpaceNode {
            tag: Tag::at(TimeValue::ZERO),
            reactions_invoked: [ReactionId(1)].into_iter().collect(),
            event_queue: vec![],
        };
        assert_ne!(a.state_hash(), b.state_hash());
    }
}
