// cinder is the trust engine implementing the upload/download protocol shared logic.
// Copyright (C) 2024  Himbeer <himbeerserverde@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Wall-clock abstraction (C4): a `Clock` trait so the state machines in
//! [`crate::upload`], [`crate::download`], and [`crate::sweeper`] never
//! call `Utc::now()` directly, plus the `Timestamp` arithmetic the data
//! model (expiry, session TTL, skew) is built on.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A wall-clock instant. Thin wrapper around `chrono::DateTime<Utc>` so
/// the rest of the crate never imports `chrono` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_chrono(value: DateTime<Utc>) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + Duration::seconds(seconds))
    }

    /// `true` iff `self` falls strictly after `other`.
    pub fn is_after(&self, other: &Self) -> bool {
        self.0 > other.0
    }

    /// `true` iff `self` falls strictly before `other`.
    pub fn is_before(&self, other: &Self) -> bool {
        self.0 < other.0
    }

    /// `|self - reference| <= skew_ms`, both bounds inclusive.
    pub fn is_within_skew(&self, reference: &Self, skew_ms: i64) -> bool {
        let delta = (self.0 - reference.0).num_milliseconds().abs();
        delta <= skew_ms
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

/// Supplies the current instant. Production code uses [`SystemClock`];
/// tests substitute a fixed or steppable clock to exercise expiry and
/// skew boundaries deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The real-time clock, backed by the system's UTC wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_skew_boundary_is_inclusive() {
        let reference = Timestamp::now();
        let at_skew = reference.plus_seconds(5);
        assert!(at_skew.is_within_skew(&reference, 5_000));

        let over_skew = Timestamp::from_chrono(at_skew.inner() + Duration::milliseconds(1));
        assert!(!over_skew.is_within_skew(&reference, 5_000));
    }

    #[test]
    fn before_and_after_are_strict() {
        let t1 = Timestamp::now();
        let t2 = t1.plus_seconds(1);
        assert!(t1.is_before(&t2));
        assert!(t2.is_after(&t1));
        assert!(!t1.is_before(&t1));
        assert!(!t1.is_after(&t1));
    }

    struct FixedClock(Timestamp);
    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    #[test]
    fn clock_trait_is_object_usable() {
        let fixed = FixedClock(Timestamp::now());
        let boxed: Box<dyn Clock> = Box::new(fixed);
        let now = boxed.now();
        assert!(!now.is_before(&now));
    }
}
