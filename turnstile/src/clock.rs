// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wall-clock abstraction for the rollover scheduler.
//!
//! Window boundaries are computed from wall-clock time, so tests that need
//! deterministic rollover behavior inject a clock instead of sleeping across
//! real boundaries. Production use never needs anything but [`SystemClock`].

use std::fmt::Debug;
use std::time::SystemTime;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + Debug + 'static {
    /// The current time (UTC).
    fn now(&self) -> SystemTime;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
///
/// To enable this type, you must enable the `test-util` feature.
#[cfg(feature = "test-util")]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<SystemTime>,
}

#[cfg(feature = "test-util")]
impl ManualClock {
    /// A manual clock starting at the given instant.
    pub fn starting_at(now: SystemTime) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        *self.now.lock().unwrap() += by;
    }

    /// Jump the clock to an absolute instant (may move backwards).
    pub fn set(&self, now: SystemTime) {
        *self.now.lock().unwrap() = now;
    }
}

#[cfg(feature = "test-util")]
impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

#[cfg(all(test, feature = "test-util"))]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn manual_clock_advances_on_demand() {
        let clock = ManualClock::starting_at(UNIX_EPOCH);
        assert_eq!(clock.now(), UNIX_EPOCH);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(90));
    }
}
