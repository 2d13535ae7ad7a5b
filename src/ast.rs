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

//! checked AST consumed by the backend
//!
//! The frontend (parser, name binder, validator) delivers a `Program`: a
//! table of reactor classes plus the name of the main class. The backend
//! never re-validates; it only resolves references that the instantiation
//! hierarchy makes visible and fails fatally when one does not resolve.

use std::collections::HashMap;
use std::fmt;

use crate::time::TimeValue;
use crate::Error;

/// Source position propagated from the frontend for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SrcSpan {
    pub line: u32,
    pub col: u32,
}

impl SrcSpan {
    pub fn new(line: u32, col: u32) -> Self {
        SrcSpan { line, col }
    }
}

impl fmt::Display for SrcSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortKind {
    Input,
    Output,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDecl {
    pub name: String,
    pub kind: PortKind,
    pub ty: InferredType,
    pub span: SrcSpan,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerDecl {
    pub name: String,
    /// First firing relative to startup.
    pub offset: TimeValue,
    /// Zero means a one-shot timer.
    pub period: TimeValue,
    pub span: SrcSpan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionOrigin {
    Logical,
    Physical,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionDecl {
    pub name: String,
    pub origin: ActionOrigin,
    pub min_delay: TimeValue,
    pub ty: InferredType,
    pub span: SrcSpan,
}

/// Reference to a port, either local (`container == None`) or on an
/// immediate child instantiation (`container == Some(child name)`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub container: Option<String>,
    pub port: String,
}

impl PortRef {
    pub fn local(port: &str) -> Self {
        PortRef { container: None, port: port.into() }
    }

    pub fn of(container: &str, port: &str) -> Self {
        PortRef { container: Some(container.into()), port: port.into() }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.container {
            Some(c) => write!(f, "{}.{}", c, self.port),
            None => write!(f, "{}", self.port),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerRef {
    Startup,
    Shutdown,
    Port(PortRef),
    Timer(String),
    Action(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EffectRef {
    Port(PortRef),
    Action(String),
}

/// A reaction declaration; its priority is its declaration position
/// within the class (1-based).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionDecl {
    pub triggers: Vec<TriggerRef>,
    /// Ports read without triggering.
    pub sources: Vec<PortRef>,
    pub effects: Vec<EffectRef>,
    /// Target-language body; opaque to the backend.
    pub body: String,
    pub span: SrcSpan,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instantiation {
    pub name: String,
    pub class: String,
    pub span: SrcSpan,
}

/// Width specification for bank/multiport connections. The validator
/// guarantees matched widths; the backend pairs endpoints left-to-right.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WidthSpec {
    /// Width inferred from the paired endpoints.
    Inferred,
    Fixed(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDecl {
    pub lhs: Vec<PortRef>,
    pub rhs: Vec<PortRef>,
    /// The `after` delay; `None` means a zero-delay logical connection.
    pub delay: Option<TimeValue>,
    pub physical: bool,
    pub width: WidthSpec,
    pub span: SrcSpan,
}

impl ConnectionDecl {
    pub fn wire(lhs: PortRef, rhs: PortRef) -> Self {
        ConnectionDecl {
            lhs: vec![lhs],
            rhs: vec![rhs],
            delay: None,
            physical: false,
            width: WidthSpec::Inferred,
            span: SrcSpan::default(),
        }
    }

    pub fn after(lhs: PortRef, rhs: PortRef, delay: TimeValue) -> Self {
        ConnectionDecl { delay: Some(delay), ..Self::wire(lhs, rhs) }
    }
}

/// A type as inferred by the frontend. The backend never interprets
/// types; it only hands them to the target-types adapter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum InferredType {
    /// No type given (untyped port in an untyped target).
    Undefined,
    Named(String),
    /// A type parameter of the enclosing reactor class.
    Variable(TypeParm),
    /// Fixed-size list; rejected by targets without list literals.
    FixedList(Box<InferredType>, usize),
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InferredType::Undefined => write!(f, "_"),
            InferredType::Named(n) => write!(f, "{}", n),
            InferredType::Variable(p) => write!(f, "{}", p.name),
            InferredType::FixedList(t, n) => write!(f, "{}[{}]", t, n),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeParm {
    pub name: String,
}

/// A reactor class definition. Component vectors preserve textual
/// declaration order; reaction priority derives from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactorClass {
    pub name: String,
    pub type_parms: Vec<TypeParm>,
    pub inputs: Vec<PortDecl>,
    pub outputs: Vec<PortDecl>,
    pub timers: Vec<TimerDecl>,
    pub actions: Vec<ActionDecl>,
    pub reactions: Vec<ReactionDecl>,
    pub instantiations: Vec<Instantiation>,
    pub connections: Vec<ConnectionDecl>,
    pub span: SrcSpan,
}

impl ReactorClass {
    pub fn new(name: &str) -> Self {
        ReactorClass {
            name: name.into(),
            type_parms: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            timers: Vec::new(),
            actions: Vec::new(),
            reactions: Vec::new(),
            instantiations: Vec::new(),
            connections: Vec::new(),
            span: SrcSpan::default(),
        }
    }

    pub fn input(&mut self, name: &str, ty: InferredType) -> &mut Self {
        self.inputs.push(PortDecl {
            name: name.into(),
            kind: PortKind::Input,
            ty,
            span: SrcSpan::default(),
        });
        self
    }

    pub fn output(&mut self, name: &str, ty: InferredType) -> &mut Self {
        self.outputs.push(PortDecl {
            name: name.into(),
            kind: PortKind::Output,
            ty,
            span: SrcSpan::default(),
        });
        self
    }

    pub fn timer(&mut self, name: &str, offset: TimeValue, period: TimeValue) -> &mut Self {
        self.timers.push(TimerDecl {
            name: name.into(),
            offset,
            period,
            span: SrcSpan::default(),
        });
        self
    }

    pub fn action(&mut self, name: &str, origin: ActionOrigin, min_delay: TimeValue) -> &mut Self {
        self.actions.push(ActionDecl {
            name: name.into(),
            origin,
            min_delay,
            ty: InferredType::Undefined,
            span: SrcSpan::default(),
        });
        self
    }

    pub fn reaction(
        &mut self,
        triggers: Vec<TriggerRef>,
        sources: Vec<PortRef>,
        effects: Vec<EffectRef>,
    ) -> &mut Self {
        self.reactions.push(ReactionDecl {
            triggers,
            sources,
            effects,
            body: String::new(),
            span: SrcSpan::default(),
        });
        self
    }

    pub fn child(&mut self, name: &str, class: &str) -> &mut Self {
        self.instantiations.push(Instantiation {
            name: name.into(),
            class: class.into(),
            span: SrcSpan::default(),
        });
        self
    }

    pub fn connect(&mut self, conn: ConnectionDecl) -> &mut Self {
        self.connections.push(conn);
        self
    }
}

/// A checked program: the class table plus the designated main class.
#[derive(Clone, Debug)]
pub struct Program {
    classes: HashMap<String, ReactorClass>,
    main: String,
}

impl Program {
    pub fn new(main: ReactorClass) -> Self {
        let main_name = main.name.clone();
        let mut classes = HashMap::new();
        classes.insert(main_name.clone(), main);
        Program { classes, main: main_name }
    }

    pub fn add_class(&mut self, class: ReactorClass) {
        assert!(
            !self.classes.contains_key(&class.name),
            "class '{}' defined twice",
            class.name
        );
        self.classes.insert(class.name.clone(), class);
    }

    pub fn main_class(&self) -> &ReactorClass {
        // The main class is inserted at construction and never removed.
        self.classes.get(&self.main).unwrap()
    }

    pub fn class(&self, name: &str, span: SrcSpan) -> Result<&ReactorClass, Error> {
        self.classes.get(name).ok_or_else(|| Error::UnknownReactorClass {
            class: name.into(),
            span,
        })
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut ReactorClass> {
        self.classes.get_mut(name)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Names of every class in the table, sorted for deterministic
    /// traversal.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }
}
