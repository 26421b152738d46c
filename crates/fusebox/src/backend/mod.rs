// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Pluggable shared storage for breaker state.
//!
//! A backend owns everything a breaker needs to remember between calls:
//! windowed outcome counters, probe counters, the lock flag, and the
//! last-transition marker used for notification deduplication. The core crate
//! provides [`MemoryBackend`] for single-process deployments; sibling crates
//! implement the same contract over shared stores (see `fusebox_redis`) so
//! many process instances of a service can agree on one breaker's state.
//!
//! # Atomicity requirements
//!
//! To be substitutable, an implementation must execute each read-modify-write
//! sequence (record + prune + recount) as one atomic unit, and must implement
//! [`transition_to_color`][StateBackend::transition_to_color] as a
//! compare-and-set: among concurrent callers requesting the same transition,
//! exactly one observes `true`.

use std::fmt;
use std::time::SystemTime;

use crate::{BackendError, Color, Config, Failure, LockState, Metadata};

mod fail_safe;
mod memory;

pub use fail_safe::FailSafe;
pub use memory::MemoryBackend;

/// Durable, shareable storage for per-breaker state.
///
/// All methods take the breaker's [`Config`]; implementations key their
/// records by [`Config::name`] and read window and policy settings from it.
pub trait StateBackend: fmt::Debug + Send + Sync {
    /// Every breaker name the backend has seen.
    fn names(&self) -> Result<Vec<String>, BackendError>;

    /// Computes a fresh metadata snapshot from the stored counters.
    fn get_metadata(&self, config: &Config) -> Result<Metadata, BackendError>;

    /// Records a tracked failure and returns the resulting snapshot.
    fn record_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError>;

    /// Records a success at `at` and returns the resulting snapshot.
    fn record_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError>;

    /// Records a failed recovery probe, distinct from normal counters.
    fn record_recovery_probe_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError>;

    /// Records a successful recovery probe, distinct from normal counters.
    fn record_recovery_probe_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError>;

    /// Reads the breaker's lock flag.
    fn get_state(&self, config: &Config) -> Result<LockState, BackendError>;

    /// Writes the breaker's lock flag and returns the flag it replaced.
    ///
    /// The swap must be atomic: among concurrent writers, each sees the
    /// token stored by its immediate predecessor, so exactly one caller
    /// observes the flag actually changing.
    fn set_state(&self, config: &Config, state: LockState) -> Result<LockState, BackendError>;

    /// Resets the breaker's lock flag to [`LockState::Unlocked`] and returns
    /// the flag it replaced, with the same atomicity as
    /// [`set_state`][Self::set_state].
    fn clear_state(&self, config: &Config) -> Result<LockState, BackendError>;

    /// Attempts to commit a color transition.
    ///
    /// Returns `true` only for the single caller that performed the
    /// transition; a transition to the color already committed is a no-op
    /// returning `false`. Committing also applies the transition's side
    /// effects: moving to green clears failure and probe bookkeeping, moving
    /// to yellow stamps the recovery start, and moving to red stamps the
    /// breach (or, when re-opening from a probe failure, schedules the next
    /// recovery after the cool-off).
    fn transition_to_color(&self, config: &Config, color: Color) -> Result<bool, BackendError>;

    /// Breaker names whose last recorded activity is at or after `time`;
    /// the complement is safe to sweep as stale.
    fn names_used_after(&self, time: SystemTime) -> Result<Vec<String>, BackendError>;
}
