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

//! splitting a state-space diagram into per-phase fragments

use std::fmt;

use crate::pretvm::{Instruction, Label, Op, Reg};
use crate::time::TimeValue;

use super::{Phase, StateSpaceDiagram};

/// Handle of a fragment in the driver's fragment list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentId(pub usize);

impl FragmentId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A guarded (or default) transition out of a fragment. `to` is `None`
/// for transitions that leave the fragment graph (to the epilogue).
#[derive(Clone, Debug)]
pub struct FragmentTransition {
    pub to: Option<FragmentId>,
    pub instructions: Vec<Instruction>,
}

/// A sub-diagram of one execution phase, wired to its neighbors by
/// transition instruction lists.
#[derive(Clone, Debug)]
pub struct StateSpaceFragment {
    pub diagram: StateSpaceDiagram,
    pub downstreams: Vec<FragmentTransition>,
    pub upstreams: Vec<FragmentId>,
}

impl StateSpaceFragment {
    pub fn new(diagram: StateSpaceDiagram) -> Self {
        StateSpaceFragment {
            diagram,
            downstreams: Vec::new(),
            upstreams: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.diagram.phase
    }
}

/// A default transition is a single unconditional jump.
pub fn is_default_transition(instructions: &[Instruction]) -> bool {
    instructions.len() == 1 && matches!(instructions[0].op, Op::Jal { .. })
}

/// Connect two fragments with the default (unguarded) transition: jump
/// to the downstream fragment's phase label.
pub fn connect_fragments_default(
    fragments: &mut [StateSpaceFragment],
    upstream: FragmentId,
    downstream: FragmentId,
) {
    let target = fragments[downstream.index()].phase();
    let transition = vec![Instruction::new(Op::Jal {
        link: Reg::WorkerReturnAddr(None),
        target: Label::Phase(target),
    })];
    debug_assert!(is_default_transition(&transition));
    fragments[upstream.index()].downstreams.push(FragmentTransition {
        to: Some(downstream),
        instructions: transition,
    });
    if upstream != downstream {
        fragments[downstream.index()].upstreams.push(upstream);
    }
}

/// Connect two fragments with a guarded transition supplied by the
/// caller.
pub fn connect_fragments_guarded(
    fragments: &mut [StateSpaceFragment],
    upstream: FragmentId,
    downstream: FragmentId,
    instructions: Vec<Instruction>,
) {
    fragments[upstream.index()].downstreams.push(FragmentTransition {
        to: Some(downstream),
        instructions,
    });
    if upstream != downstream {
        fragments[downstream.index()].upstreams.push(upstream);
    }
}

/// Split an explored diagram into an initialization fragment (head up
/// to, but excluding, the loop node) and a periodic fragment (the loop
/// body), wiring them with default transitions. An acyclic diagram
/// yields a single initialization fragment; an empty one yields none.
pub fn fragmentize_init_and_periodic(diagram: &StateSpaceDiagram) -> Vec<StateSpaceFragment> {
    let mut fragments: Vec<StateSpaceFragment> = Vec::new();
    if diagram.is_empty() {
        return fragments;
    }
    let head = diagram.head.expect("non-empty diagram has a head");

    if Some(head) != diagram.loop_node {
        let mut init = StateSpaceDiagram::new(Phase::Init);
        let mut previous = None;
        let mut current = Some(head);
        while current.is_some() && current != diagram.loop_node {
            let idx = current.unwrap();
            let copy = init.add_node(diagram.node(idx).clone());
            if init.head.is_none() {
                init.head = Some(copy);
            }
            if let Some(p) = previous {
                init.add_transition(p, copy);
            }
            init.tail = Some(copy);
            previous = Some(copy);
            current = diagram.downstream(idx);
        }
        // The initialization phase spans up to the start of the loop.
        init.hyperperiod = diagram
            .loop_node
            .map_or(TimeValue::ZERO, |l| diagram.node(l).tag.time);
        fragments.push(StateSpaceFragment::new(init));
    }

    if diagram.is_cyclic() {
        let loop_idx = diagram.loop_node.unwrap();
        let tail_idx = diagram.tail.expect("cyclic diagram has a tail");
        let mut periodic = StateSpaceDiagram::new(Phase::Periodic);
        let mut previous = None;
        let mut current = loop_idx;
        loop {
            let copy = periodic.add_node(diagram.node(current).clone());
            if periodic.head.is_none() {
                periodic.head = Some(copy);
            }
            if let Some(p) = previous {
                periodic.add_transition(p, copy);
            }
            periodic.tail = Some(copy);
            previous = Some(copy);
            if current == tail_idx {
                break;
            }
            current = diagram
                .downstream(current)
                .expect("loop body is a connected chain");
        }
        periodic.loop_node = periodic.head;
        periodic.loop_node_next = diagram.loop_node_next.clone();
        periodic.hyperperiod = diagram.hyperperiod;
        periodic.add_transition(periodic.tail.unwrap(), periodic.head.unwrap());
        fragments.push(StateSpaceFragment::new(periodic));
    }

    if fragments.len() == 2 {
        connect_fragments_default(&mut fragments, FragmentId(0), FragmentId(1));
    }
    if let Some(last) = fragments.len().checked_sub(1) {
        if fragments[last].phase() == Phase::Periodic {
            connect_fragments_default(&mut fragments, FragmentId(last), FragmentId(last));
        }
    }
    log::debug!(
        "fragmentized into {:?}",
        fragments.iter().map(|f| f.phase()).collect::<Vec<_>>()
    );
    fragments
}
