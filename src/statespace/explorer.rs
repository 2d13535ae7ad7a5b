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

//! event-queue simulation from a start mode to horizon, hyperperiod, or loop

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::NodeIndex;

use crate::instance::{EffectKey, InstanceTree, ReactionId, TriggerKey};
use crate::time::{Tag, TimeValue};
use crate::Error;

use super::{Event, EventQueue, Phase, StateSpaceDiagram, StateSpaceNode};

/// Iteration bound guarding against programs whose event queue never
/// drains, never loops, and never crosses a finite horizon.
pub const DEFAULT_EXPLORATION_BOUND: usize = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExplorationMode {
    /// Start from startup triggers and the timers' first firings.
    InitAndPeriodic,
    /// Start from the shutdown instant of a program with a timeout,
    /// over-approximating the triggers possibly present there.
    ShutdownTimeout,
    /// Start from a shutdown caused by event-queue starvation.
    ShutdownStarvation,
}

pub struct StateSpaceExplorer<'a> {
    tree: &'a InstanceTree,
    /// Program timeout; required by `ShutdownTimeout` mode.
    timeout: Option<TimeValue>,
    max_iterations: usize,
}

impl<'a> StateSpaceExplorer<'a> {
    pub fn new(tree: &'a InstanceTree, timeout: Option<TimeValue>) -> Self {
        StateSpaceExplorer {
            tree,
            timeout,
            max_iterations: DEFAULT_EXPLORATION_BOUND,
        }
    }

    pub fn with_iteration_bound(mut self, bound: usize) -> Self {
        self.max_iterations = bound;
        self
    }

    /// Explore the state space until the horizon is passed, the event
    /// queue drains, or a previously seen logical state recurs (a loop).
    ///
    /// Nodes are finalized at timestamp granularity: microstep-only
    /// advances merge into the node under construction. A logical state
    /// recurring across timestamps closes a loop with a positive
    /// hyperperiod; one recurring across microsteps of a single
    /// timestamp closes a degenerate loop with hyperperiod zero.
    pub fn explore(
        &self,
        horizon: Tag,
        mode: ExplorationMode,
    ) -> Result<StateSpaceDiagram, Error> {
        let phase = match mode {
            ExplorationMode::InitAndPeriodic => Phase::Init,
            ExplorationMode::ShutdownTimeout => Phase::ShutdownTimeout,
            ExplorationMode::ShutdownStarvation => Phase::ShutdownStarvation,
        };
        let mut diagram = StateSpaceDiagram::new(phase);
        let mut queue = EventQueue::new();
        self.add_initial_events(&mut queue, mode)?;
        log::debug!("explore {:?}: {} initial events", mode, queue.len());
        if queue.is_empty() {
            return Ok(diagram);
        }

        let mut previous_tag: Option<Tag> = None;
        let mut current_tag = queue.peek_tag().unwrap();
        // The node being accumulated for the current timestamp.
        let mut current_node: Option<StateSpaceNode> = None;
        // The last node finalized into the diagram.
        let mut previous_index: Option<NodeIndex> = None;
        // Finalized logical states, for loop detection across timestamps.
        let mut unique_nodes: HashMap<u64, NodeIndex> = HashMap::new();
        // Intermediate states within the current timestamp, for loop
        // detection across microsteps.
        let mut micro_states: HashSet<u64> = HashSet::new();

        for iteration in 0.. {
            if iteration >= self.max_iterations {
                return Err(Error::HorizonExceededWithoutLoop);
            }

            let current_events = pop_events_at(&mut queue, current_tag);
            let invoked: BTreeSet<ReactionId> = current_events
                .iter()
                .flat_map(|e| self.tree.dependent_reactions(e.trigger).iter().copied())
                .collect();
            for event in self.new_events(&current_events, &invoked, current_tag) {
                queue.push(event);
            }
            let snapshot = queue.snapshot();
            log::trace!(
                "tag {}: {} events, {} reactions, {} queued",
                current_tag,
                current_events.len(),
                invoked.len(),
                snapshot.len()
            );

            match previous_tag {
                // First iteration: start accumulating the first node.
                None => {
                    let node = StateSpaceNode {
                        tag: current_tag,
                        reactions_invoked: invoked,
                        event_queue: snapshot,
                    };
                    micro_states.clear();
                    micro_states.insert(node.state_hash());
                    current_node = Some(node);
                }
                // True time advance: finalize the accumulated node.
                Some(prev) if current_tag.time > prev.time => {
                    let node = current_node.take().unwrap();
                    let hash = node.state_hash();
                    if let Some(&duplicate) = unique_nodes.get(&hash) {
                        close_loop(&mut diagram, duplicate, node, previous_index);
                        return Ok(diagram);
                    }
                    let idx = diagram.add_node(node);
                    unique_nodes.insert(hash, idx);
                    diagram.tail = Some(idx);
                    match previous_index {
                        Some(p) => diagram.add_transition(p, idx),
                        None => diagram.head = Some(idx),
                    }
                    previous_index = Some(idx);

                    let node = StateSpaceNode {
                        tag: current_tag,
                        reactions_invoked: invoked,
                        event_queue: snapshot,
                    };
                    micro_states.clear();
                    micro_states.insert(node.state_hash());
                    current_node = Some(node);
                }
                // Microstep advance only: merge into the open node.
                Some(prev) => {
                    debug_assert_eq!(current_tag.time, prev.time);
                    let node = current_node.as_mut().unwrap();
                    node.reactions_invoked.extend(invoked);
                    node.event_queue = snapshot;
                    if !micro_states.insert(node.state_hash()) {
                        // The same logical state recurred without the
                        // timestamp advancing: a microstep-only loop.
                        let node = current_node.take().unwrap();
                        diagram.loop_node_next = Some(node.clone());
                        let idx = diagram.add_node(node);
                        if let Some(p) = previous_index {
                            diagram.add_transition(p, idx);
                        }
                        if diagram.head.is_none() {
                            diagram.head = Some(idx);
                        }
                        diagram.tail = Some(idx);
                        diagram.loop_node = Some(idx);
                        diagram.hyperperiod = TimeValue::ZERO;
                        diagram.add_transition(idx, idx);
                        log::debug!("microstep loop at {}", current_tag);
                        return Ok(diagram);
                    }
                }
            }

            if queue.is_empty() {
                break;
            }
            previous_tag = Some(current_tag);
            current_tag = queue.peek_tag().unwrap();
            if horizon != Tag::FOREVER && current_tag.time > horizon.time {
                diagram.horizon_truncated = true;
                break;
            }
        }

        // Flush the node still under accumulation, if any.
        if let Some(node) = current_node {
            let advances = previous_index
                .map_or(true, |p| diagram.node(p).tag.time < node.tag.time);
            if advances {
                let idx = diagram.add_node(node);
                diagram.tail = Some(idx);
                if let Some(p) = previous_index {
                    diagram.add_transition(p, idx);
                }
                if diagram.head.is_none() {
                    diagram.head = Some(idx);
                }
            }
        }
        Ok(diagram)
    }

    /// Seed the queue with the known initial events of the mode.
    /// Physical actions are never enqueued; they only arrive
    /// nondeterministically at runtime.
    fn add_initial_events(&self, queue: &mut EventQueue, mode: ExplorationMode) -> Result<(), Error> {
        let origin = Tag::at(TimeValue::ZERO);
        match mode {
            ExplorationMode::InitAndPeriodic => {
                for rid in self.tree.reactor_ids() {
                    if self.tree.reactor(rid).has_startup() {
                        queue.push(Event::new(TriggerKey::Startup(rid), origin));
                    }
                }
                for tid in self.tree.timer_ids() {
                    let timer = self.tree.timer(tid);
                    queue.push(Event::new(TriggerKey::Timer(tid), Tag::at(timer.offset)));
                }
            }
            ExplorationMode::ShutdownTimeout => {
                // Tags here are relative to the shutdown instant, not
                // absolute runtime tags, hence (0, 0) throughout.
                let timeout = self.timeout.ok_or_else(|| Error::MalformedTiming {
                    detail: "shutdown-timeout exploration requires a timeout".into(),
                })?;
                for rid in self.tree.reactor_ids() {
                    if self.tree.reactor(rid).has_shutdown() {
                        queue.push(Event::new(TriggerKey::Shutdown(rid), origin));
                    }
                }
                for tid in self.tree.timer_ids() {
                    let timer = self.tree.timer(tid);
                    if fires_at(timer.offset, timer.period, timeout) {
                        queue.push(Event::new(TriggerKey::Timer(tid), origin));
                    }
                }
                // Over-approximate: assume every input port and logical
                // action is present at the shutdown instant. Reactions
                // this invokes needlessly degrade to no-ops at runtime
                // behind their presence guards.
                for pid in self.tree.port_ids() {
                    if self.tree.port(pid).is_input() {
                        queue.push(Event::new(TriggerKey::Port(pid), origin));
                    }
                }
                for aid in self.tree.action_ids() {
                    if !self.tree.action(aid).is_physical() {
                        queue.push(Event::new(TriggerKey::Action(aid), origin));
                    }
                }
            }
            ExplorationMode::ShutdownStarvation => {
                for rid in self.tree.reactor_ids() {
                    if self.tree.reactor(rid).has_shutdown() {
                        queue.push(Event::new(TriggerKey::Shutdown(rid), origin));
                    }
                }
            }
        }
        Ok(())
    }

    /// Events produced by processing `current_events` and invoking
    /// `invoked` at `now`: the next firing of periodic timers, delayed
    /// port propagation along connections, and scheduled logical actions.
    fn new_events(
        &self,
        current_events: &[Event],
        invoked: &BTreeSet<ReactionId>,
        now: Tag,
    ) -> Vec<Event> {
        let mut events = Vec::new();

        for event in current_events {
            if let TriggerKey::Timer(tid) = event.trigger {
                let timer = self.tree.timer(tid);
                if !timer.is_one_shot() {
                    events.push(Event::new(
                        event.trigger,
                        Tag::at(event.tag.time + timer.period),
                    ));
                }
            }
        }

        for &rid in invoked {
            for effect in &self.tree.reaction(rid).effects {
                match effect {
                    EffectKey::Port(pid) => {
                        for &(downstream, attrs) in &self.tree.port(*pid).destinations {
                            let delay = attrs.delay.unwrap_or(TimeValue::ZERO);
                            events.push(Event::new(
                                TriggerKey::Port(downstream),
                                Tag::at(now.time + delay),
                            ));
                        }
                    }
                    EffectKey::Action(aid) => {
                        let action = self.tree.action(*aid);
                        if action.is_physical() {
                            continue;
                        }
                        let microstep = if action.min_delay == TimeValue::ZERO {
                            now.microstep + 1
                        } else {
                            0
                        };
                        events.push(Event::new(
                            TriggerKey::Action(*aid),
                            Tag::new(now.time + action.min_delay, microstep),
                        ));
                    }
                }
            }
        }
        events
    }
}

/// Whether a timer with the given offset and period has a firing that
/// lands exactly on the timeout instant.
fn fires_at(offset: TimeValue, period: TimeValue, timeout: TimeValue) -> bool {
    if timeout < offset {
        return false;
    }
    if period == TimeValue::ZERO {
        return timeout == offset;
    }
    (timeout - offset).to_nanoseconds() % period.to_nanoseconds() == 0
}

fn pop_events_at(queue: &mut EventQueue, tag: Tag) -> Vec<Event> {
    let mut events = Vec::new();
    while queue.peek_tag() == Some(tag) {
        events.push(queue.pop().unwrap());
    }
    events
}

fn close_loop(
    diagram: &mut StateSpaceDiagram,
    duplicate: NodeIndex,
    node: StateSpaceNode,
    previous_index: Option<NodeIndex>,
) {
    diagram.loop_node = Some(duplicate);
    diagram.hyperperiod = node.tag.time - diagram.node(duplicate).tag.time;
    log::debug!(
        "loop detected: {} back to {}, hyperperiod {}",
        node.tag,
        diagram.node(duplicate).tag,
        diagram.hyperperiod
    );
    diagram.loop_node_next = Some(node);
    diagram.tail = previous_index;
    // Execution continues from the last finalized node back around.
    if let Some(tail) = previous_index {
        diagram.add_transition(tail, duplicate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ActionOrigin, ConnectionDecl, EffectRef, InferredType, PortRef, Program, ReactorClass,
        TriggerRef,
    };
    use crate::instance::elaborate;

    const SEC: i64 = 1_000_000_000;

    fn single_timer_program() -> Program {
        let mut main = ReactorClass::new("Main");
        main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
        main.reaction(vec![TriggerRef::Timer("t".into())], vec![], vec![]);
        Program::new(main)
    }

    #[test]
    fn test_single_timer_loops_after_one_period() {
        let tree = elaborate(&single_timer_program()).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        assert!(diagram.is_cyclic());
        assert_eq!(diagram.hyperperiod, TimeValue::new(SEC));
        assert_eq!(diagram.node_count(), 1);
        let head = diagram.head.unwrap();
        assert_eq!(diagram.loop_node, Some(head));
        assert_eq!(diagram.node(head).tag, Tag::at(TimeValue::ZERO));
        assert_eq!(diagram.node(head).reactions_invoked.len(), 1);
        let next = diagram.loop_node_next.as_ref().unwrap();
        assert_eq!(
            next.tag.time - diagram.node(head).tag.time,
            diagram.hyperperiod
        );
    }

    #[test]
    fn test_exploration_is_deterministic() {
        let tree = elaborate(&single_timer_program()).unwrap();
        let explorer = StateSpaceExplorer::new(&tree, None);
        let a = explorer
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        let b = explorer
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.hyperperiod, b.hyperperiod);
        assert_eq!(a.loop_node, b.loop_node);
        let (ha, hb) = (a.head.unwrap(), b.head.unwrap());
        assert_eq!(a.node(ha), b.node(hb));
    }

    #[test]
    fn test_one_shot_timer_drains() {
        let mut main = ReactorClass::new("Main");
        main.timer("once", TimeValue::new(5), TimeValue::ZERO);
        main.reaction(vec![TriggerRef::Timer("once".into())], vec![], vec![]);
        let tree = elaborate(&Program::new(main)).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        assert!(!diagram.is_cyclic());
        assert_eq!(diagram.node_count(), 1);
        let head = diagram.head.unwrap();
        assert_eq!(diagram.node(head).tag, Tag::at(TimeValue::new(5)));
        assert_eq!(diagram.node(head).reactions_invoked.len(), 1);
        assert!(diagram.node(head).event_queue.is_empty());
    }

    #[test]
    fn test_no_events_no_nodes() {
        let mut main = ReactorClass::new("Main");
        main.input("inp", InferredType::Undefined);
        main.reaction(vec![TriggerRef::Port(PortRef::local("inp"))], vec![], vec![]);
        let tree = elaborate(&Program::new(main)).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        assert!(diagram.is_empty());
        assert!(diagram.head.is_none());
    }

    #[test]
    fn test_physical_action_never_enqueued() {
        let mut main = ReactorClass::new("Main");
        main.action("sensor", ActionOrigin::Physical, TimeValue::ZERO);
        main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
        // Reaction 1 fires on the timer and schedules the physical
        // action; reaction 2 fires on the physical action only.
        main.reaction(
            vec![TriggerRef::Timer("t".into())],
            vec![],
            vec![EffectRef::Action("sensor".into())],
        );
        main.reaction(vec![TriggerRef::Action("sensor".into())], vec![], vec![]);
        let tree = elaborate(&Program::new(main)).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        let physical_only = tree.reactor(tree.main()).reactions[1];
        for idx in diagram.iter_from_head() {
            assert!(
                !diagram.node(idx).reactions_invoked.contains(&physical_only),
                "reaction triggered only by a physical action must not be explored"
            );
        }
    }

    #[test]
    fn test_after_delay_connection() {
        const MS: i64 = 1_000_000;
        let mut producer = ReactorClass::new("Producer");
        producer.output("out", InferredType::Named("u32".into()));
        producer.timer("t", TimeValue::new(100 * MS), TimeValue::new(100 * MS));
        producer.reaction(
            vec![TriggerRef::Timer("t".into())],
            vec![],
            vec![EffectRef::Port(PortRef::local("out"))],
        );
        let mut consumer = ReactorClass::new("Consumer");
        consumer.input("inp", InferredType::Named("u32".into()));
        consumer.reaction(vec![TriggerRef::Port(PortRef::local("inp"))], vec![], vec![]);
        let mut main = ReactorClass::new("Main");
        main.child("a", "Producer").child("b", "Consumer");
        main.connect(ConnectionDecl::after(
            PortRef::of("a", "out"),
            PortRef::of("b", "inp"),
            TimeValue::new(50 * MS),
        ));
        let mut program = Program::new(main);
        program.add_class(producer);
        program.add_class(consumer);
        let tree = elaborate(&program).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        assert!(diagram.is_cyclic());
        assert_eq!(diagram.hyperperiod, TimeValue::new(100 * MS));
        // Producer fires at 100ms, consumer at 150ms: two reactions per
        // hyperperiod, in two nodes.
        let times: Vec<i64> = diagram
            .iter_from_head()
            .map(|n| diagram.node(n).tag.time.to_nanoseconds())
            .collect();
        assert_eq!(times, vec![100 * MS, 150 * MS]);
        let total_reactions: usize = diagram
            .iter_from_head()
            .map(|n| diagram.node(n).reactions_invoked.len())
            .sum();
        assert_eq!(total_reactions, 2);
    }

    #[test]
    fn test_microstep_loop_detected_without_time_advance() {
        let mut main = ReactorClass::new("Main");
        main.action("a1", ActionOrigin::Logical, TimeValue::ZERO);
        main.action("a2", ActionOrigin::Logical, TimeValue::ZERO);
        main.timer("kick", TimeValue::ZERO, TimeValue::ZERO);
        main.reaction(
            vec![TriggerRef::Timer("kick".into())],
            vec![],
            vec![EffectRef::Action("a1".into())],
        );
        main.reaction(
            vec![TriggerRef::Action("a1".into())],
            vec![],
            vec![EffectRef::Action("a2".into())],
        );
        main.reaction(
            vec![TriggerRef::Action("a2".into())],
            vec![],
            vec![EffectRef::Action("a1".into())],
        );
        let tree = elaborate(&Program::new(main)).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap();
        assert!(diagram.is_cyclic());
        assert_eq!(diagram.hyperperiod, TimeValue::ZERO);
        assert_eq!(diagram.node_count(), 1);
        let head = diagram.head.unwrap();
        assert_eq!(diagram.node(head).tag.time, TimeValue::ZERO);
        assert_eq!(diagram.node(head).reactions_invoked.len(), 3);
    }

    #[test]
    fn test_shutdown_timeout_overapproximates() {
        let mut main = ReactorClass::new("Main");
        main.input("p", InferredType::Undefined);
        main.reaction(vec![TriggerRef::Port(PortRef::local("p"))], vec![], vec![]);
        let tree = elaborate(&Program::new(main)).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, Some(TimeValue::new(10 * SEC)))
            .explore(Tag::at(TimeValue::ZERO), ExplorationMode::ShutdownTimeout)
            .unwrap();
        assert_eq!(diagram.node_count(), 1);
        let head = diagram.head.unwrap();
        assert_eq!(diagram.node(head).tag, Tag::at(TimeValue::ZERO));
        assert_eq!(
            diagram.node(head).reactions_invoked.len(),
            1,
            "the port-triggered reaction is assumed present at shutdown"
        );
    }

    #[test]
    fn test_shutdown_timeout_includes_aligned_timers_only() {
        let tree = {
            let mut main = ReactorClass::new("Main");
            main.timer("aligned", TimeValue::ZERO, TimeValue::new(SEC));
            main.timer("offbeat", TimeValue::new(1), TimeValue::new(3 * SEC));
            main.reaction(vec![TriggerRef::Timer("aligned".into())], vec![], vec![]);
            main.reaction(vec![TriggerRef::Timer("offbeat".into())], vec![], vec![]);
            elaborate(&Program::new(main)).unwrap()
        };
        // timeout = 10s: the 1s-periodic timer lands on it, the offset
        // one does not.
        let diagram = StateSpaceExplorer::new(&tree, Some(TimeValue::new(10 * SEC)))
            .explore(Tag::at(TimeValue::ZERO), ExplorationMode::ShutdownTimeout)
            .unwrap();
        let head = diagram.head.unwrap();
        let aligned_reaction = tree.reactor(tree.main()).reactions[0];
        let offbeat_reaction = tree.reactor(tree.main()).reactions[1];
        assert!(diagram.node(head).reactions_invoked.contains(&aligned_reaction));
        assert!(!diagram.node(head).reactions_invoked.contains(&offbeat_reaction));
    }

    #[test]
    fn test_shutdown_starvation_only_shutdown() {
        let mut main = ReactorClass::new("Main");
        main.input("p", InferredType::Undefined);
        main.reaction(vec![TriggerRef::Shutdown], vec![], vec![]);
        main.reaction(vec![TriggerRef::Port(PortRef::local("p"))], vec![], vec![]);
        let tree = elaborate(&Program::new(main)).unwrap();
        let diagram = StateSpaceExplorer::new(&tree, None)
            .explore(Tag::FOREVER, ExplorationMode::ShutdownStarvation)
            .unwrap();
        let head = diagram.head.unwrap();
        let shutdown_reaction = tree.reactor(tree.main()).reactions[0];
        assert_eq!(diagram.node(head).reactions_invoked.len(), 1);
        assert!(diagram.node(head).reactions_invoked.contains(&shutdown_reaction));
    }

    #[test]
    fn test_horizon_truncates() {
        let tree = elaborate(&single_timer_program()).unwrap();
        // A very tight iteration bound forces the defect path.
        let err = StateSpaceExplorer::new(&tree, None)
            .with_iteration_bound(0)
            .explore(Tag::FOREVER, ExplorationMode::InitAndPeriodic)
            .unwrap_err();
        assert_eq!(err, Error::HorizonExceededWithoutLoop);
    }
}
