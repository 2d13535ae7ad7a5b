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

use super::{ActionId, PortId, ReactionId, ReactorId, TriggerKey};

/// A reaction effect: a port written or an action scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EffectKey {
    Port(PortId),
    Action(ActionId),
}

/// A reaction instance, priority-ordered among the reactions of its
/// owning reactor by declaration position (1-based `index`).
///
/// `depends_on_reactions` and `dependent_reactions` thread the
/// intra-reactor priority chain: reaction k must observe all effects of
/// reactions 1..k-1 at the same tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionInstance {
    pub id: ReactionId,
    pub owner: ReactorId,
    /// 1-based declaration position within the owning reactor.
    pub index: usize,
    pub triggers: Vec<TriggerKey>,
    /// Ports read without triggering.
    pub sources: Vec<PortId>,
    pub effects: Vec<EffectKey>,
    pub depends_on_reactions: BTreeSet<ReactionId>,
    pub dependent_reactions: BTreeSet<ReactionId>,
}

impl ReactionInstance {
    pub(crate) fn new(id: ReactionId, owner: ReactorId, index: usize) -> Self {
        ReactionInstance {
            id,
            owner,
            index,
            triggers: Vec::new(),
            sources: Vec::new(),
            effects: Vec::new(),
            depends_on_reactions: BTreeSet::new(),
            dependent_reactions: BTreeSet::new(),
        }
    }
}
