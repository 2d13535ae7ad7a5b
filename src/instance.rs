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

//! runtime reactor instance tree
//!
//! Elaboration unfolds the instantiation hierarchy of the main reactor
//! class into a tree of instances. The tree owns every reactor, port,
//! reaction, timer, and action instance in flat arenas; all cross
//! references (parent links, trigger sets, connection maps) are typed
//! integer handles into those arenas, so the ownership graph stays
//! acyclic and handle sets have a stable order.

use std::collections::BTreeSet;
use std::fmt;

mod elaborate;
mod port;
mod reaction;
mod reactor;
mod trigger;

pub use elaborate::elaborate;
pub use port::PortInstance;
pub use reaction::{EffectKey, ReactionInstance};
pub use reactor::{ConnectionAttrs, ConnectionInstance, ReactorInstance};
pub use trigger::{ActionInstance, TimerInstance};

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(&self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(
    /// Handle of a reactor instance in the tree.
    ReactorId
);
handle_type!(
    /// Handle of a port instance in the tree.
    PortId
);
handle_type!(
    /// Handle of a reaction instance in the tree.
    ReactionId
);
handle_type!(
    /// Handle of a timer instance in the tree.
    TimerId
);
handle_type!(
    /// Handle of an action instance in the tree.
    ActionId
);

/// Anything an event can be queued on. Startup and shutdown are
/// per-reactor builtin triggers; the rest are component instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKey {
    Startup(ReactorId),
    Shutdown(ReactorId),
    Timer(TimerId),
    Action(ActionId),
    Port(PortId),
}

/// The unfolded main-rooted instance tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceTree {
    reactors: Vec<ReactorInstance>,
    ports: Vec<PortInstance>,
    reactions: Vec<ReactionInstance>,
    timers: Vec<TimerInstance>,
    actions: Vec<ActionInstance>,
    main: ReactorId,
}

impl InstanceTree {
    pub(crate) fn empty() -> Self {
        InstanceTree {
            reactors: Vec::new(),
            ports: Vec::new(),
            reactions: Vec::new(),
            timers: Vec::new(),
            actions: Vec::new(),
            main: ReactorId(0),
        }
    }

    pub fn main(&self) -> ReactorId {
        self.main
    }

    pub fn reactor(&self, id: ReactorId) -> &ReactorInstance {
        &self.reactors[id.index()]
    }

    pub fn port(&self, id: PortId) -> &PortInstance {
        &self.ports[id.index()]
    }

    pub fn reaction(&self, id: ReactionId) -> &ReactionInstance {
        &self.reactions[id.index()]
    }

    pub fn timer(&self, id: TimerId) -> &TimerInstance {
        &self.timers[id.index()]
    }

    pub fn action(&self, id: ActionId) -> &ActionInstance {
        &self.actions[id.index()]
    }

    pub(crate) fn reactor_mut(&mut self, id: ReactorId) -> &mut ReactorInstance {
        &mut self.reactors[id.index()]
    }

    pub(crate) fn port_mut(&mut self, id: PortId) -> &mut PortInstance {
        &mut self.ports[id.index()]
    }

    pub(crate) fn reaction_mut(&mut self, id: ReactionId) -> &mut ReactionInstance {
        &mut self.reactions[id.index()]
    }

    pub(crate) fn push_reactor(&mut self, reactor: ReactorInstance) -> ReactorId {
        let id = ReactorId(self.reactors.len());
        self.reactors.push(reactor);
        id
    }

    pub(crate) fn push_port(&mut self, port: PortInstance) -> PortId {
        let id = PortId(self.ports.len());
        self.ports.push(port);
        id
    }

    pub(crate) fn push_reaction(&mut self, reaction: ReactionInstance) -> ReactionId {
        let id = ReactionId(self.reactions.len());
        self.reactions.push(reaction);
        id
    }

    pub(crate) fn push_timer(&mut self, timer: TimerInstance) -> TimerId {
        let id = TimerId(self.timers.len());
        self.timers.push(timer);
        id
    }

    pub(crate) fn push_action(&mut self, action: ActionInstance) -> ActionId {
        let id = ActionId(self.actions.len());
        self.actions.push(action);
        id
    }

    /// All reactor instances in creation (depth-first declaration) order.
    pub fn reactor_ids(&self) -> impl Iterator<Item = ReactorId> {
        (0..self.reactors.len()).map(ReactorId)
    }

    pub fn port_ids(&self) -> impl Iterator<Item = PortId> {
        (0..self.ports.len()).map(PortId)
    }

    pub fn reaction_ids(&self) -> impl Iterator<Item = ReactionId> {
        (0..self.reactions.len()).map(ReactionId)
    }

    pub fn timer_ids(&self) -> impl Iterator<Item = TimerId> {
        (0..self.timers.len()).map(TimerId)
    }

    pub fn action_ids(&self) -> impl Iterator<Item = ActionId> {
        (0..self.actions.len()).map(ActionId)
    }

    pub fn reactor_count(&self) -> usize {
        self.reactors.len()
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.len()
    }

    /// The flat trigger table in a deterministic order (all ports, then
    /// all actions). Runtime presence flags are addressed by position in
    /// this table.
    pub fn trigger_table(&self) -> Vec<TriggerKey> {
        self.port_ids()
            .map(TriggerKey::Port)
            .chain(self.action_ids().map(TriggerKey::Action))
            .collect()
    }

    /// Reactions that depend on (are invoked by the presence of) the
    /// given trigger.
    pub fn dependent_reactions(&self, trigger: TriggerKey) -> &BTreeSet<ReactionId> {
        match trigger {
            TriggerKey::Startup(r) => &self.reactor(r).startup_reactions,
            TriggerKey::Shutdown(r) => &self.reactor(r).shutdown_reactions,
            TriggerKey::Timer(t) => &self.timer(t).dependent_reactions,
            TriggerKey::Action(a) => &self.action(a).dependent_reactions,
            TriggerKey::Port(p) => &self.port(p).dependent_reactions,
        }
    }

    /// The transitive destination closure of a source port: every port
    /// reachable by following connection edges downstream. Only
    /// materialized connection edges are followed, so the closure never
    /// escapes the source owner's subtree through a destination output.
    pub fn eventual_destinations(&self, source: PortId) -> Vec<PortId> {
        let mut closure: Vec<PortId> = Vec::new();
        let mut worklist: Vec<PortId> = self
            .port(source)
            .destinations
            .iter()
            .map(|(dst, _)| *dst)
            .collect();
        while let Some(q) = worklist.pop() {
            if closure.contains(&q) {
                continue;
            }
            closure.push(q);
            worklist.extend(self.port(q).destinations.iter().map(|(dst, _)| *dst));
        }
        closure
    }

    /// Dotted instance path from the root, e.g. `main.src.out`.
    pub fn reactor_full_name(&self, id: ReactorId) -> String {
        let mut segments = vec![self.reactor(id).name.clone()];
        let mut current = self.reactor(id).parent;
        while let Some(p) = current {
            segments.push(self.reactor(p).name.clone());
            current = self.reactor(p).parent;
        }
        segments.reverse();
        segments.join(".")
    }

    /// Instance path with a custom joiner, for label generation.
    pub fn reactor_label_name(&self, id: ReactorId) -> String {
        self.reactor_full_name(id).replace('.', "_")
    }

    pub fn reaction_full_name(&self, id: ReactionId) -> String {
        let reaction = self.reaction(id);
        format!(
            "{}.reaction_{}",
            self.reactor_full_name(reaction.owner),
            reaction.index
        )
    }

    pub fn reaction_label_name(&self, id: ReactionId) -> String {
        self.reaction_full_name(id).replace('.', "_")
    }

    pub fn port_full_name(&self, id: PortId) -> String {
        let port = self.port(id);
        format!("{}.{}", self.reactor_full_name(port.owner), port.name)
    }

    pub fn trigger_label_name(&self, trigger: TriggerKey) -> String {
        match trigger {
            TriggerKey::Startup(r) => format!("{}_startup", self.reactor_label_name(r)),
            TriggerKey::Shutdown(r) => format!("{}_shutdown", self.reactor_label_name(r)),
            TriggerKey::Timer(t) => {
                let timer = self.timer(t);
                format!("{}_{}", self.reactor_label_name(timer.owner), timer.name)
            }
            TriggerKey::Action(a) => {
                let action = self.action(a);
                format!("{}_{}", self.reactor_label_name(action.owner), action.name)
            }
            TriggerKey::Port(p) => self.port_full_name(p).replace('.', "_"),
        }
    }
}
