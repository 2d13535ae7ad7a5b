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

//! logical time: nanosecond time values and (timestamp, microstep) tags

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point in (or duration of) logical time, in nanoseconds.
///
/// `TimeValue::MAX` is the reserved "forever" value; it compares greater
/// than any finite time and is preserved by saturating arithmetic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeValue(pub i64);

impl TimeValue {
    pub const ZERO: TimeValue = TimeValue(0);
    pub const MAX: TimeValue = TimeValue(i64::MAX);

    pub fn new(nanoseconds: i64) -> Self {
        assert!(nanoseconds >= 0, "negative time value: {}", nanoseconds);
        TimeValue(nanoseconds)
    }

    pub fn from_unit(magnitude: i64, unit: TimeUnit) -> Self {
        TimeValue::new(magnitude.saturating_mul(unit.in_nanoseconds()))
    }

    pub fn to_nanoseconds(&self) -> i64 {
        self.0
    }

    pub fn is_forever(&self) -> bool {
        *self == TimeValue::MAX
    }
}

impl Add for TimeValue {
    type Output = TimeValue;
    fn add(self, rhs: TimeValue) -> TimeValue {
        TimeValue(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeValue {
    type Output = TimeValue;
    fn sub(self, rhs: TimeValue) -> TimeValue {
        assert!(self.0 >= rhs.0, "time subtraction underflow: {} - {}", self, rhs);
        TimeValue(self.0 - rhs.0)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_forever() {
            write!(f, "forever")
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

/// Time units accepted by the frontend; the backend works in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Nanos,
    Micros,
    Millis,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn in_nanoseconds(&self) -> i64 {
        match self {
            TimeUnit::Nanos => 1,
            TimeUnit::Micros => 1_000,
            TimeUnit::Millis => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
        }
    }
}

/// A logical tag: (timestamp, microstep), ordered lexicographically.
///
/// Microsteps order events that are logically simultaneous but causally
/// distinct, e.g. an action scheduled with zero delay from the current tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub time: TimeValue,
    pub microstep: u32,
}

impl Tag {
    pub const FOREVER: Tag = Tag {
        time: TimeValue::MAX,
        microstep: u32::MAX,
    };

    pub fn new(time: TimeValue, microstep: u32) -> Self {
        Tag { time, microstep }
    }

    /// The tag at (t, 0) for a finite time t.
    pub fn at(time: TimeValue) -> Self {
        Tag { time, microstep: 0 }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.time, self.microstep)
    }
}
