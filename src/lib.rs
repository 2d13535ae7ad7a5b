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

//! tidal: static-scheduling backend for a deterministic reactor
//! coordination language
//!
//! Given a checked AST, the backend unfolds the reactor instance tree,
//! explores the discrete-event state space until it loops, lowers each
//! execution phase to a partitioned DAG of reaction invocations, and
//! emits per-worker PretVM instruction streams linked into a single
//! executable driven by a hyperperiod barrier.

pub mod ast;
mod dag;
mod error;
mod instance;
mod pretvm;
mod scheduler;
mod statespace;
pub mod target;
mod time;

pub use crate::dag::{Dag, DagGenerator, DagKind, DagNode};
pub use crate::error::Error;
pub use crate::instance::{
    elaborate, ActionId, ActionInstance, ConnectionAttrs, ConnectionInstance, EffectKey,
    InstanceTree, PortId, PortInstance, ReactionId, ReactionInstance, ReactorId, ReactorInstance,
    TimerId, TimerInstance, TriggerKey,
};
pub use crate::pretvm::{
    Executable, InstWord, Instruction, InstructionGenerator, Label, ObjectFile, Op, Opcode,
    Operand, RawOperand, Reg, Relocation, ResolvedProgram, RuntimeAddr, WorkerId,
};
pub use crate::scheduler::{CompiledSchedule, SchedulerConfig, StaticScheduler};
pub use crate::statespace::{
    connect_fragments_default, connect_fragments_guarded, fragmentize_init_and_periodic,
    is_default_transition, Event, EventQueue, ExplorationMode, FragmentId, FragmentTransition,
    Phase, StateSpaceDiagram, StateSpaceExplorer, StateSpaceFragment, StateSpaceNode,
};
pub use crate::target::{transform_delayed_connections, TargetTypes};
pub use crate::time::{Tag, TimeUnit, TimeValue};
