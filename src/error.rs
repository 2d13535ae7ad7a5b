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

use std::fmt;

use crate::ast::SrcSpan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A connection endpoint does not resolve to a local port or an
    /// immediate child's port.
    UnresolvedPort { port: String, reactor: String, span: SrcSpan },
    /// Two components of the same reactor share a name; the validator
    /// should have rejected this upstream.
    Duplicate { name: String, reactor: String, span: SrcSpan },
    /// An instantiation refers to a class missing from the program's
    /// class table.
    UnknownReactorClass { class: String, span: SrcSpan },
    /// A bounded horizon was requested but exploration ran past it
    /// without finding a loop.
    HorizonExceededWithoutLoop,
    /// Timer or delay parameters that cannot be scheduled (e.g. a
    /// negative interval surviving validation).
    MalformedTiming { detail: String },
    /// The reaction DAG contains a cycle; indicates an explorer or
    /// generator bug, not a user error.
    UnsortableDag,
    /// A placeholder operand survived linking.
    UnresolvedPlaceholder { worker: usize, label: String },
    /// The emission table was handed an opcode it does not know.
    UnknownOpcode { opcode: String },
    /// A fragment declares more than one unguarded downstream transition.
    DuplicateDefaultTransition { phase: String },
    /// The target-types adapter cannot render a construct the program uses.
    UnsupportedFeature { description: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnresolvedPort { port, reactor, span } => {
                write!(f, "{}: unresolved port reference '{}' in reactor '{}'", span, port, reactor)
            }
            Self::Duplicate { name, reactor, span } => {
                write!(f, "{}: duplicate name '{}' in reactor '{}'", span, name, reactor)
            }
            Self::UnknownReactorClass { class, span } => {
                write!(f, "{}: unknown reactor class '{}'", span, class)
            }
            Self::HorizonExceededWithoutLoop => {
                write!(f, "exploration exceeded the horizon without detecting a loop")
            }
            Self::MalformedTiming { detail } => write!(f, "malformed timing: {}", detail),
            Self::UnsortableDag => write!(f, "reaction DAG is not topologically sortable"),
            Self::UnresolvedPlaceholder { worker, label } => {
                write!(f, "unresolved placeholder at worker {} label '{}'", worker, label)
            }
            Self::UnknownOpcode { opcode } => write!(f, "unknown opcode '{}'", opcode),
            Self::DuplicateDefaultTransition { phase } => {
                write!(f, "fragment '{}' has multiple default transitions", phase)
            }
            Self::UnsupportedFeature { description } => {
                write!(f, "unsupported by the target: {}", description)
            }
        }
    }
}

impl std::error::Error for Error {}
