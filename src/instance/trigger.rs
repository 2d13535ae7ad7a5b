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

use crate::ast::ActionOrigin;
use crate::time::TimeValue;

use super::{ActionId, ReactionId, ReactorId, TimerId};

/// A timer instance. A zero period means a one-shot firing at `offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerInstance {
    pub id: TimerId,
    pub name: String,
    pub owner: ReactorId,
    pub offset: TimeValue,
    pub period: TimeValue,
    pub dependent_reactions: BTreeSet<ReactionId>,
}

impl TimerInstance {
    pub(crate) fn new(
        id: TimerId,
        name: &str,
        owner: ReactorId,
        offset: TimeValue,
        period: TimeValue,
    ) -> Self {
        TimerInstance {
            id,
            name: name.into(),
            owner,
            offset,
            period,
            dependent_reactions: BTreeSet::new(),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.period == TimeValue::ZERO
    }
}

/// An action instance. Physical actions arrive nondeterministically at
/// runtime and are never enqueued by the state-space explorer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionInstance {
    pub id: ActionId,
    pub name: String,
    pub owner: ReactorId,
    pub origin: ActionOrigin,
    pub min_delay: TimeValue,
    pub dependent_reactions: BTreeSet<ReactionId>,
}

impl ActionInstance {
    pub(crate) fn new(
        id: ActionId,
        name: &str,
        owner: ReactorId,
        origin: ActionOrigin,
        min_delay: TimeValue,
    ) -> Self {
        ActionInstance {
            id,
            name: name.into(),
            owner,
            origin,
            min_delay,
            dependent_reactions: BTreeSet::new(),
        }
    }

    pub fn is_physical(&self) -> bool {
        self.origin == ActionOrigin::Physical
    }
}
