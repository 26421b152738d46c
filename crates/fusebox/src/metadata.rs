// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The read-only aggregate of a breaker's recent history.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use crate::{Color, Config, Failure};

/// An operator override stored alongside a breaker's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LockState {
    /// No override; color is derived from counters and elapsed time.
    #[default]
    Unlocked,
    /// Forced closed: the breaker reads green regardless of failures.
    LockedGreen,
    /// Forced open: the breaker reads red regardless of recovery.
    LockedRed,
}

impl LockState {
    /// The token used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::LockedGreen => "locked_green",
            Self::LockedRed => "locked_red",
        }
    }

    /// Whether no override is in effect.
    #[must_use]
    pub fn is_unlocked(self) -> bool {
        self == Self::Unlocked
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned when parsing an unrecognized lock token.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized lock state `{0}`")]
pub struct ParseLockStateError(String);

impl FromStr for LockState {
    type Err = ParseLockStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unlocked" => Ok(Self::Unlocked),
            "locked_green" => Ok(Self::LockedGreen),
            "locked_red" => Ok(Self::LockedRed),
            other => Err(ParseLockStateError(other.to_owned())),
        }
    }
}

/// A point-in-time snapshot of one breaker's backend state.
///
/// Metadata is recomputed from backend-native counters on every read and never
/// cached across calls; correctness in multi-process deployments depends on
/// always seeing the latest shared state. The snapshot itself is a plain value
/// with no behavior beyond [`color`][Self::color].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// Successes within the current window (totals when the window is infinite).
    pub successes: u64,
    /// Failures within the current window (totals when the window is infinite).
    pub failures: u64,
    /// Probe successes since recovery began.
    pub recovery_probe_successes: u32,
    /// Probe failures since recovery began.
    pub recovery_probe_failures: u32,
    /// When the most recent success was recorded.
    pub last_success_at: Option<SystemTime>,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<SystemTime>,
    /// The most recent failure itself.
    pub last_failure: Option<Failure>,
    /// Successes recorded since the last failure.
    pub consecutive_successes: u64,
    /// Failures recorded since the last success.
    pub consecutive_failures: u64,
    /// When the breaker entered its probing phase, if it is probing.
    pub recovery_started_at: Option<SystemTime>,
    /// When traffic control last opened the breaker.
    pub breached_at: Option<SystemTime>,
    /// An explicit next-probe time set when a probe failure re-opened the breaker.
    pub recovery_scheduled_after: Option<SystemTime>,
    /// The operator override, if any.
    pub locked_state: LockState,
}

impl Metadata {
    /// Derives the breaker's color at `now`.
    ///
    /// This is a pure function of the snapshot and the configuration: a lock
    /// override wins outright; otherwise an unbreached breaker is green, and a
    /// breached one is red until its cool-off elapses and yellow afterwards.
    #[must_use]
    pub fn color(&self, config: &Config, now: SystemTime) -> Color {
        match self.locked_state {
            LockState::LockedGreen => Color::Green,
            LockState::LockedRed => Color::Red,
            LockState::Unlocked => match self.breached_at {
                None => Color::Green,
                Some(breached_at) => {
                    let probe_after = self
                        .recovery_scheduled_after
                        .unwrap_or_else(|| breached_at + config.cool_off_time());
                    if now >= probe_after { Color::Yellow } else { Color::Red }
                }
            },
        }
    }
}
