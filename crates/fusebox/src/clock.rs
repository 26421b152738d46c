// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time sources for breaker bookkeeping.
//!
//! Every component that needs wall-clock time receives a [`Clock`] instead of
//! calling [`SystemTime::now`] directly. Production code uses
//! [`Clock::system`]; tests freeze and advance time through [`ClockControl`]
//! (available with the `test-util` feature), which makes cool-off and window
//! behavior fully deterministic.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A shareable source of wall-clock time.
///
/// Clocks are cheap to clone; clones observe the same underlying time source.
#[derive(Clone, Debug)]
pub struct Clock(Arc<ClockState>);

#[derive(Debug)]
enum ClockState {
    System,
    Controlled(Mutex<SystemTime>),
}

impl Clock {
    /// Creates a clock backed by the operating system's real time.
    #[must_use]
    pub fn system() -> Self {
        Self(Arc::new(ClockState::System))
    }

    /// Creates a clock frozen at the Unix epoch.
    ///
    /// Equivalent to `ClockControl::new().to_clock()`.
    #[cfg(any(feature = "test-util", test))]
    #[must_use]
    pub fn new_frozen() -> Self {
        ClockControl::new().to_clock()
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        match &*self.0 {
            ClockState::System => SystemTime::now(),
            ClockState::Controlled(time) => *time.lock(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Manual control over a frozen [`Clock`].
///
/// The control and every clock produced by [`to_clock`][Self::to_clock] share
/// state, so advancing the control is immediately visible to all of them.
#[cfg(any(feature = "test-util", test))]
#[derive(Clone, Debug)]
pub struct ClockControl(Arc<ClockState>);

#[cfg(any(feature = "test-util", test))]
impl ClockControl {
    /// Creates a control whose clocks start at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::new_at(UNIX_EPOCH)
    }

    /// Creates a control whose clocks start at the given time.
    #[must_use]
    pub fn new_at(time: SystemTime) -> Self {
        Self(Arc::new(ClockState::Controlled(Mutex::new(time))))
    }

    /// Returns a clock driven by this control.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock(Arc::clone(&self.0))
    }

    /// Moves the controlled time forward.
    pub fn advance(&self, duration: Duration) {
        if let ClockState::Controlled(time) = &*self.0 {
            let mut time = time.lock();
            *time += duration;
        }
    }

    /// Moves the controlled time to an absolute point, which must not be
    /// earlier than the current controlled time.
    pub fn advance_to(&self, timestamp: SystemTime) {
        if let ClockState::Controlled(time) = &*self.0 {
            let mut time = time.lock();
            debug_assert!(timestamp >= *time, "controlled clocks cannot move backwards");
            *time = timestamp;
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a time to whole seconds since the Unix epoch, saturating at zero
/// for times before the epoch.
#[must_use]
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
}

/// Converts whole seconds since the Unix epoch back to a [`SystemTime`].
#[must_use]
pub fn from_unix_seconds(seconds: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(seconds)
}
