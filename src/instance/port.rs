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

use crate::ast::{InferredType, PortKind};

use super::{ConnectionAttrs, PortId, ReactionId, ReactorId};

/// A port instance, owned by exactly one reactor instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInstance {
    pub id: PortId,
    pub name: String,
    pub kind: PortKind,
    pub owner: ReactorId,
    pub ty: InferredType,
    /// Reactions that depend on this port, as a trigger or as a source.
    pub dependent_reactions: BTreeSet<ReactionId>,
    /// Reactions that write to this port.
    pub writers: BTreeSet<ReactionId>,
    /// Direct downstream ports, materialized from the connection maps of
    /// the owning hierarchy after elaboration.
    pub destinations: Vec<(PortId, ConnectionAttrs)>,
}

impl PortInstance {
    pub(crate) fn new(
        id: PortId,
        name: &str,
        kind: PortKind,
        owner: ReactorId,
        ty: InferredType,
    ) -> Self {
        PortInstance {
            id,
            name: name.into(),
            kind,
            owner,
            ty,
            dependent_reactions: BTreeSet::new(),
            writers: BTreeSet::new(),
            destinations: Vec::new(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind == PortKind::Input
    }
}
