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

//! instance elaboration: unfolding the class hierarchy into the tree

use std::collections::HashSet;

use crate::ast::{EffectRef, PortRef, Program, ReactorClass, SrcSpan, TriggerRef};
use crate::Error;

use super::{
    ConnectionAttrs, ConnectionInstance, InstanceTree, PortId, PortInstance, ReactionInstance,
    ReactorId, ReactorInstance, TriggerKey,
};
use super::{ActionInstance, TimerInstance};

/// Unfold the program's main class into the full runtime instance tree.
///
/// Children are instantiated depth-first in textual declaration order, so
/// arena handles are assigned deterministically: elaborating the same
/// program twice produces structurally identical trees.
pub fn elaborate(program: &Program) -> Result<InstanceTree, Error> {
    let mut elaborator = Elaborator {
        program,
        tree: InstanceTree::empty(),
    };
    let main_class = program.main_class();
    let main = elaborator.instantiate(main_class, "main", None)?;
    elaborator.tree.main = main;
    elaborator.materialize_destinations();
    log::debug!(
        "elaborated {} reactors, {} ports, {} reactions",
        elaborator.tree.reactor_count(),
        elaborator.tree.ports.len(),
        elaborator.tree.reaction_count()
    );
    Ok(elaborator.tree)
}

struct Elaborator<'a> {
    program: &'a Program,
    tree: InstanceTree,
}

impl<'a> Elaborator<'a> {
    fn instantiate(
        &mut self,
        class: &ReactorClass,
        name: &str,
        parent: Option<ReactorId>,
    ) -> Result<ReactorId, Error> {
        // The ordinal counts prior siblings unfolded from the same class.
        let ordinal = parent.map_or(0, |p| {
            self.tree
                .reactor(p)
                .children
                .iter()
                .filter(|c| self.tree.reactor(**c).class == class.name)
                .count()
        });

        let id = self.tree.push_reactor(ReactorInstance::new(
            super::ReactorId(self.tree.reactor_count()),
            name,
            &class.name,
            ordinal,
            parent,
        ));
        if let Some(p) = parent {
            self.tree.reactor_mut(p).children.push(id);
        }

        self.check_unique_names(class, id)?;

        // Children first, in declaration order; their ports must exist
        // before this level's connections are resolved.
        for inst in &class.instantiations {
            let child_class = self.program.class(&inst.class, inst.span)?.clone();
            self.instantiate(&child_class, &inst.name, Some(id))?;
        }

        for decl in class.inputs.iter().chain(class.outputs.iter()) {
            let pid = self.tree.push_port(PortInstance::new(
                PortId(self.tree.ports.len()),
                &decl.name,
                decl.kind,
                id,
                decl.ty.clone(),
            ));
            match decl.kind {
                crate::ast::PortKind::Input => self.tree.reactor_mut(id).inputs.push(pid),
                crate::ast::PortKind::Output => self.tree.reactor_mut(id).outputs.push(pid),
            }
        }

        for decl in &class.timers {
            let tid = self.tree.push_timer(TimerInstance::new(
                super::TimerId(self.tree.timers.len()),
                &decl.name,
                id,
                decl.offset,
                decl.period,
            ));
            self.tree.reactor_mut(id).timers.push(tid);
        }

        for decl in &class.actions {
            let aid = self.tree.push_action(ActionInstance::new(
                super::ActionId(self.tree.actions.len()),
                &decl.name,
                id,
                decl.origin,
                decl.min_delay,
            ));
            self.tree.reactor_mut(id).actions.push(aid);
        }

        for conn in &class.connections {
            self.resolve_connection(id, conn)?;
        }

        for (position, decl) in class.reactions.iter().enumerate() {
            let rid = self.tree.push_reaction(ReactionInstance::new(
                super::ReactionId(self.tree.reactions.len()),
                id,
                position + 1,
            ));
            self.tree.reactor_mut(id).reactions.push(rid);

            // Priority chain: each reaction depends on its predecessor.
            if position > 0 {
                let prev = self.tree.reactor(id).reactions[position - 1];
                self.tree.reaction_mut(prev).dependent_reactions.insert(rid);
                self.tree.reaction_mut(rid).depends_on_reactions.insert(prev);
            }

            for trigger in &decl.triggers {
                let key = match trigger {
                    TriggerRef::Startup => {
                        self.tree.reactor_mut(id).startup_reactions.insert(rid);
                        TriggerKey::Startup(id)
                    }
                    TriggerRef::Shutdown => {
                        self.tree.reactor_mut(id).shutdown_reactions.insert(rid);
                        TriggerKey::Shutdown(id)
                    }
                    TriggerRef::Port(port_ref) => {
                        let pid = self.resolve_port(id, port_ref, decl.span)?;
                        self.tree.port_mut(pid).dependent_reactions.insert(rid);
                        TriggerKey::Port(pid)
                    }
                    TriggerRef::Timer(name) => {
                        let tid = self.resolve_timer(id, name, decl.span)?;
                        self.tree.timers[tid.index()].dependent_reactions.insert(rid);
                        TriggerKey::Timer(tid)
                    }
                    TriggerRef::Action(name) => {
                        let aid = self.resolve_action(id, name, decl.span)?;
                        self.tree.actions[aid.index()].dependent_reactions.insert(rid);
                        TriggerKey::Action(aid)
                    }
                };
                self.tree.reaction_mut(rid).triggers.push(key);
            }

            for source in &decl.sources {
                let pid = self.resolve_port(id, source, decl.span)?;
                self.tree.port_mut(pid).dependent_reactions.insert(rid);
                self.tree.reaction_mut(rid).sources.push(pid);
            }

            for effect in &decl.effects {
                let key = match effect {
                    EffectRef::Port(port_ref) => {
                        let pid = self.resolve_port(id, port_ref, decl.span)?;
                        self.tree.port_mut(pid).writers.insert(rid);
                        super::EffectKey::Port(pid)
                    }
                    EffectRef::Action(name) => {
                        super::EffectKey::Action(self.resolve_action(id, name, decl.span)?)
                    }
                };
                self.tree.reaction_mut(rid).effects.push(key);
            }
        }

        Ok(id)
    }

    /// Name uniqueness is the validator's responsibility; elaboration
    /// only asserts it so a broken frontend fails loudly.
    fn check_unique_names(&self, class: &ReactorClass, id: ReactorId) -> Result<(), Error> {
        let mut seen = HashSet::new();
        let names = class
            .inputs
            .iter()
            .map(|d| (&d.name, d.span))
            .chain(class.outputs.iter().map(|d| (&d.name, d.span)))
            .chain(class.timers.iter().map(|d| (&d.name, d.span)))
            .chain(class.actions.iter().map(|d| (&d.name, d.span)))
            .chain(class.instantiations.iter().map(|d| (&d.name, d.span)));
        for (name, span) in names {
            if !seen.insert(name.clone()) {
                return Err(Error::Duplicate {
                    name: name.clone(),
                    reactor: self.tree.reactor_full_name(id),
                    span,
                });
            }
        }
        Ok(())
    }

    /// Resolve a port reference at `reactor` level: either a local port
    /// or `child.port` on an immediate child.
    fn resolve_port(
        &self,
        reactor: ReactorId,
        port_ref: &PortRef,
        span: SrcSpan,
    ) -> Result<PortId, Error> {
        let unresolved = || Error::UnresolvedPort {
            port: port_ref.to_string(),
            reactor: self.tree.reactor_full_name(reactor),
            span,
        };
        let owner = match &port_ref.container {
            None => reactor,
            Some(child_name) => *self
                .tree
                .reactor(reactor)
                .children
                .iter()
                .find(|c| self.tree.reactor(**c).name == *child_name)
                .ok_or_else(unresolved)?,
        };
        let owner = self.tree.reactor(owner);
        owner
            .inputs
            .iter()
            .chain(owner.outputs.iter())
            .copied()
            .find(|p| self.tree.port(*p).name == port_ref.port)
            .ok_or_else(unresolved)
    }

    fn resolve_timer(
        &self,
        reactor: ReactorId,
        name: &str,
        span: SrcSpan,
    ) -> Result<super::TimerId, Error> {
        self.tree
            .reactor(reactor)
            .timers
            .iter()
            .copied()
            .find(|t| self.tree.timer(*t).name == name)
            .ok_or_else(|| Error::UnresolvedPort {
                port: name.into(),
                reactor: self.tree.reactor_full_name(reactor),
                span,
            })
    }

    fn resolve_action(
        &self,
        reactor: ReactorId,
        name: &str,
        span: SrcSpan,
    ) -> Result<super::ActionId, Error> {
        self.tree
            .reactor(reactor)
            .actions
            .iter()
            .copied()
            .find(|a| self.tree.action(*a).name == name)
            .ok_or_else(|| Error::UnresolvedPort {
                port: name.into(),
                reactor: self.tree.reactor_full_name(reactor),
                span,
            })
    }

    fn resolve_connection(
        &mut self,
        reactor: ReactorId,
        conn: &crate::ast::ConnectionDecl,
    ) -> Result<(), Error> {
        let lhs = conn
            .lhs
            .iter()
            .map(|r| self.resolve_port(reactor, r, conn.span))
            .collect::<Result<Vec<_>, _>>()?;
        let rhs = conn
            .rhs
            .iter()
            .map(|r| self.resolve_port(reactor, r, conn.span))
            .collect::<Result<Vec<_>, _>>()?;
        let attrs = ConnectionAttrs {
            delay: conn.delay,
            physical: conn.physical,
        };

        // Endpoints pair left-to-right; a single endpoint on either side
        // fans out (or in) to the other side. Width mismatches beyond
        // that are a validator concern.
        let pairs: Vec<(PortId, PortId)> = if lhs.len() == rhs.len() {
            lhs.iter().copied().zip(rhs.iter().copied()).collect()
        } else if lhs.len() == 1 {
            rhs.iter().map(|d| (lhs[0], *d)).collect()
        } else if rhs.len() == 1 {
            lhs.iter().map(|s| (*s, rhs[0])).collect()
        } else {
            panic!(
                "mismatched connection widths ({} -> {}) in {}",
                lhs.len(),
                rhs.len(),
                self.tree.reactor_full_name(reactor)
            );
        };

        for (source, destination) in pairs {
            self.tree.reactor_mut(reactor).connections.push(ConnectionInstance {
                source,
                destination,
                attrs,
            });
        }
        Ok(())
    }

    /// Copy every level's connection map onto the source ports so that
    /// downstream propagation is a plain handle walk.
    fn materialize_destinations(&mut self) {
        for rid in 0..self.tree.reactor_count() {
            let connections = self.tree.reactor(ReactorId(rid)).connections.clone();
            for conn in connections {
                self.tree
                    .port_mut(conn.source)
                    .destinations
                    .push((conn.destination, conn.attrs));
            }
        }
    }
}
