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

//! shared program fixtures for the integration scenarios

// Each test binary uses its own subset of the fixtures.
#![allow(dead_code)]

use tidal::ast::{
    ActionOrigin, ConnectionDecl, EffectRef, InferredType, PortRef, Program, ReactorClass,
    TriggerRef,
};
use tidal::TimeValue;

pub const MS: i64 = 1_000_000;
pub const SEC: i64 = 1_000_000_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One timer at offset 0 with a 1s period, triggering one reaction.
pub fn single_timer() -> Program {
    let mut main = ReactorClass::new("Main");
    main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
    main.reaction(vec![TriggerRef::Timer("t".into())], vec![], vec![]);
    Program::new(main)
}

/// `n` reactions in one reactor, all triggered by the same 1s timer.
pub fn priority_chain(n: usize) -> Program {
    let mut main = ReactorClass::new("Main");
    main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
    for _ in 0..n {
        main.reaction(vec![TriggerRef::Timer("t".into())], vec![], vec![]);
    }
    Program::new(main)
}

/// A producer firing every 100ms, connected to a consumer via
/// `after 50ms`.
pub fn after_delay() -> Program {
    let mut producer = ReactorClass::new("Producer");
    producer.output("out", InferredType::Named("u32".into()));
    producer.timer("t", TimeValue::new(100 * MS), TimeValue::new(100 * MS));
    producer.reaction(
        vec![TriggerRef::Timer("t".into())],
        vec![],
        vec![EffectRef::Port(PortRef::local("out"))],
    );
    let mut consumer = ReactorClass::new("Consumer");
    consumer.input("inp", InferredType::Named("u32".into()));
    consumer.reaction(vec![TriggerRef::Port(PortRef::local("inp"))], vec![], vec![]);
    let mut main = ReactorClass::new("Main");
    main.child("a", "Producer").child("b", "Consumer");
    main.connect(ConnectionDecl::after(
        PortRef::of("a", "out"),
        PortRef::of("b", "inp"),
        TimeValue::new(50 * MS),
    ));
    let mut program = Program::new(main);
    program.add_class(producer);
    program.add_class(consumer);
    program
}

/// A timer-driven reaction scheduling a physical action, plus a
/// reaction triggered only by that physical action.
pub fn physical_action() -> Program {
    let mut main = ReactorClass::new("Main");
    main.action("sensor", ActionOrigin::Physical, TimeValue::ZERO);
    main.timer("t", TimeValue::ZERO, TimeValue::new(SEC));
    main.reaction(
        vec![TriggerRef::Timer("t".into())],
        vec![],
        vec![EffectRef::Action("sensor".into())],
    );
    main.reaction(vec![TriggerRef::Action("sensor".into())], vec![], vec![]);
    Program::new(main)
}

/// One input port and one reaction triggered by it; only reachable
/// through the shutdown phase.
pub fn input_only() -> Program {
    let mut main = ReactorClass::new("Main");
    main.input("p", InferredType::Undefined);
    main.reaction(vec![TriggerRef::Port(PortRef::local("p"))], vec![], vec![]);
    Program::new(main)
}

/// Two zero-delay logical actions mutually scheduling each other,
/// kicked off by a one-shot timer.
pub fn microstep_pair() -> Program {
    let mut main = ReactorClass::new("Main");
    main.action("a1", ActionOrigin::Logical, TimeValue::ZERO);
    main.action("a2", ActionOrigin::Logical, TimeValue::ZERO);
    main.timer("kick", TimeValue::ZERO, TimeValue::ZERO);
    main.reaction(
        vec![TriggerRef::Timer("kick".into())],
        vec![],
        vec![EffectRef::Action("a1".into())],
    );
    main.reaction(
        vec![TriggerRef::Action("a1".into())],
        vec![],
        vec![EffectRef::Action("a2".into())],
    );
    main.reaction(
        vec![TriggerRef::Action("a2".into())],
        vec![],
        vec![EffectRef::Action("a1".into())],
    );
    Program::new(main)
}
