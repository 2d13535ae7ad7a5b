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

//! target-types adapter and the delayed-connection rewrite
//!
//! The backend never interprets target-language types or reaction
//! bodies; a `TargetTypes` implementation supplied by the code
//! generator renders them. The one AST rewrite living here replaces
//! every logical connection carrying an `after` delay with a generated
//! delay reactor, whose two reaction bodies come from the adapter. The
//! rewritten program then goes through ordinary elaboration.

use crate::ast::{
    ActionDecl, ActionOrigin, ConnectionDecl, EffectRef, InferredType, Instantiation, PortRef,
    Program, ReactionDecl, ReactorClass, SrcSpan, TriggerRef, TypeParm, WidthSpec,
};
use crate::time::TimeUnit;
use crate::Error;

/// How the target language renders the constructs the backend cannot
/// interpret itself.
pub trait TargetTypes {
    /// Whether the target supports generic (parameterized) reactor
    /// types; without them, delay reactors are monomorphized per
    /// payload type.
    fn supports_generics(&self) -> bool;

    /// A time literal in target syntax.
    fn render_time_literal(&self, magnitude: i64, unit: TimeUnit) -> String;

    /// A type in target syntax; fails with `UnsupportedFeature` when
    /// the target cannot express it.
    fn render_type(&self, ty: &InferredType) -> Result<String, Error>;

    /// Body of the reaction that schedules the delay action from the
    /// delayed input.
    fn render_delay_reaction_body(&self, action: &str, port: &str) -> String;

    /// Body of the reaction that forwards the delay action's payload to
    /// the output.
    fn render_forward_body(&self, action: &str, port: &str) -> String;
}

/// Replace every logical connection with an `after` delay by a delay
/// reactor: input -> (schedule action with the delay) -> (forward to
/// output), plus the two zero-delay plumbing connections. Physical
/// connections are left untouched.
pub fn transform_delayed_connections(
    program: &mut Program,
    target: &dyn TargetTypes,
) -> Result<(), Error> {
    let mut generated: Vec<ReactorClass> = Vec::new();
    let mut counter = 0usize;

    for class_name in program.class_names() {
        let mut class = program.class(&class_name, SrcSpan::default())?.clone();
        let mut rewritten = Vec::new();
        let mut changed = false;

        for conn in std::mem::take(&mut class.connections) {
            let delay = match conn.delay {
                Some(d) if !conn.physical => d,
                _ => {
                    rewritten.push(conn);
                    continue;
                }
            };
            changed = true;

            let payload = port_type(program, &class, &conn.lhs[0])?;
            let delay_class = delay_reactor_class(
                &format!("Delay{}", counter),
                &payload,
                delay,
                target,
            )?;
            let instance_name = format!("delay{}", counter);
            counter += 1;

            class.instantiations.push(Instantiation {
                name: instance_name.clone(),
                class: delay_class.name.clone(),
                span: conn.span,
            });
            rewritten.push(ConnectionDecl {
                lhs: conn.lhs,
                rhs: vec![PortRef::of(&instance_name, "inp")],
                delay: None,
                physical: false,
                width: WidthSpec::Inferred,
                span: conn.span,
            });
            rewritten.push(ConnectionDecl {
                lhs: vec![PortRef::of(&instance_name, "out")],
                rhs: conn.rhs,
                delay: None,
                physical: false,
                width: WidthSpec::Inferred,
                span: conn.span,
            });
            generated.push(delay_class);
            log::debug!(
                "rewrote delayed connection in '{}' through '{}'",
                class_name,
                instance_name
            );
        }

        if changed {
            class.connections = rewritten;
            *program
                .class_mut(&class_name)
                .expect("class came from the table") = class;
        }
    }

    for class in generated {
        program.add_class(class);
    }
    Ok(())
}

fn delay_reactor_class(
    name: &str,
    payload: &InferredType,
    delay: crate::time::TimeValue,
    target: &dyn TargetTypes,
) -> Result<ReactorClass, Error> {
    let ty = if target.supports_generics() {
        InferredType::Variable(TypeParm { name: "T".into() })
    } else {
        // Monomorphic targets must be able to express the payload
        // concretely.
        if let InferredType::Variable(parm) = payload {
            return Err(Error::UnsupportedFeature {
                description: format!(
                    "delayed connection over type parameter '{}' requires generics",
                    parm.name
                ),
            });
        }
        target.render_type(payload)?;
        payload.clone()
    };

    let mut class = ReactorClass::new(name);
    if target.supports_generics() {
        class.type_parms.push(TypeParm { name: "T".into() });
    }
    class.input("inp", ty.clone());
    class.output("out", ty.clone());
    class.actions.push(ActionDecl {
        name: "act".into(),
        origin: ActionOrigin::Logical,
        min_delay: delay,
        ty,
        span: SrcSpan::default(),
    });
    // The forward reaction comes first so that, at one tag, the
    // previously scheduled payload leaves before a new one is accepted.
    class.reactions.push(ReactionDecl {
        triggers: vec![TriggerRef::Action("act".into())],
        sources: vec![],
        effects: vec![EffectRef::Port(PortRef::local("out"))],
        body: target.render_forward_body("act", "out"),
        span: SrcSpan::default(),
    });
    class.reactions.push(ReactionDecl {
        triggers: vec![TriggerRef::Port(PortRef::local("inp"))],
        sources: vec![],
        effects: vec![EffectRef::Action("act".into())],
        body: target.render_delay_reaction_body("act", "inp"),
        span: SrcSpan::default(),
    });
    Ok(class)
}

/// The declared type of a port reference at `class` level: a local
/// port, or a port of an immediate child's class.
fn port_type(
    program: &Program,
    class: &ReactorClass,
    port_ref: &PortRef,
) -> Result<InferredType, Error> {
    let unresolved = || Error::UnresolvedPort {
        port: port_ref.to_string(),
        reactor: class.name.clone(),
        span: SrcSpan::default(),
    };
    let owner = match &port_ref.container {
        None => class,
        Some(child) => {
            let inst = class
                .instantiations
                .iter()
                .find(|i| i.name == *child)
                .ok_or_else(unresolved)?;
            program.class(&inst.class, inst.span)?
        }
    };
    owner
        .inputs
        .iter()
        .chain(owner.outputs.iter())
        .find(|p| p.name == port_ref.port)
        .map(|p| p.ty.clone())
        .ok_or_else(unresolved)
}
