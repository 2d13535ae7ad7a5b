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

use std::collections::BTreeSet;

use crate::time::TimeValue;

use super::{ActionId, PortId, ReactionId, ReactorId, TimerId};

/// Attributes a connection carries from its declaration into the
/// materialized connection map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionAttrs {
    /// The `after` delay; `None` is a zero-delay logical connection.
    pub delay: Option<TimeValue>,
    pub physical: bool,
}

/// A resolved (source port → destination port) pair at one level of the
/// hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionInstance {
    pub source: PortId,
    pub destination: PortId,
    pub attrs: ConnectionAttrs,
}

/// A node in the runtime reactor tree. Owns handles to every component
/// instantiated from its class; the arenas behind the handles live in
/// the enclosing `InstanceTree`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactorInstance {
    pub id: ReactorId,
    /// Instance name within the parent (the instantiation name, or
    /// `main` for the root).
    pub name: String,
    /// Name of the class this instance was unfolded from.
    pub class: String,
    /// Count of prior siblings instantiated from the same class; used
    /// only to disambiguate display output.
    pub ordinal: usize,
    pub parent: Option<ReactorId>,
    pub children: Vec<ReactorId>,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
    pub timers: Vec<TimerId>,
    pub actions: Vec<ActionId>,
    /// Reaction instances in declaration (priority) order.
    pub reactions: Vec<ReactionId>,
    /// The connection map materialized from this class's connection
    /// declarations: resolved source → destination pairs at this level.
    pub connections: Vec<ConnectionInstance>,
    /// Reactions of this reactor triggered by the builtin startup and
    /// shutdown triggers.
    pub startup_reactions: BTreeSet<ReactionId>,
    pub shutdown_reactions: BTreeSet<ReactionId>,
}

impl ReactorInstance {
    pub(crate) fn new(
        id: ReactorId,
        name: &str,
        class: &str,
        ordinal: usize,
        parent: Option<ReactorId>,
    ) -> Self {
        ReactorInstance {
            id,
            name: name.into(),
            class: class.into(),
            ordinal,
            parent,
            children: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            timers: Vec::new(),
            actions: Vec::new(),
            reactions: Vec::new(),
            connections: Vec::new(),
            startup_reactions: BTreeSet::new(),
            shutdown_reactions: BTreeSet::new(),
        }
    }

    pub fn has_startup(&self) -> bool {
        !self.startup_reactions.is_empty()
    }

    pub fn has_shutdown(&self) -> bool {
        !self.shutdown_reactions.is_empty()
    }
}
