// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Failure isolation around backend calls.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use super::StateBackend;
use crate::notifier::ErrorNotifier;
use crate::{BackendError, Color, Config, Failure, LockState, Metadata};

/// A decorator that keeps backend trouble away from protected calls.
///
/// Every inner call's error is caught, reported through the configured error
/// notifier, and replaced with a safe default: an empty name list, a default
/// metadata snapshot, [`LockState::Unlocked`], or a lost (`false`) transition.
/// The wrapper therefore never returns `Err`, which makes it idempotent under
/// composition: wrapping a `FailSafe` in another `FailSafe` changes nothing.
///
/// The breaker handle routes all of its backend traffic through this type, so
/// a store outage degrades the breaker (it fails open, safely) instead of
/// surfacing infrastructure errors to the caller.
#[derive(Clone)]
pub struct FailSafe {
    inner: Arc<dyn StateBackend>,
    error_notifier: ErrorNotifier,
}

impl FailSafe {
    /// Wraps a backend with the given error reporter.
    #[must_use]
    pub fn new(inner: Arc<dyn StateBackend>, error_notifier: ErrorNotifier) -> Self {
        Self { inner, error_notifier }
    }

    /// Wraps the backend and error notifier a configuration carries.
    #[must_use]
    pub fn for_config(config: &Config) -> Self {
        Self::new(Arc::clone(config.backend()), config.error_notifier().clone())
    }

    fn guard<T>(&self, result: Result<T, BackendError>, fallback: T) -> Result<T, BackendError> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                (self.error_notifier)(&error);
                Ok(fallback)
            }
        }
    }
}

impl fmt::Debug for FailSafe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailSafe").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl StateBackend for FailSafe {
    fn names(&self) -> Result<Vec<String>, BackendError> {
        self.guard(self.inner.names(), Vec::new())
    }

    fn get_metadata(&self, config: &Config) -> Result<Metadata, BackendError> {
        self.guard(self.inner.get_metadata(config), Metadata::default())
    }

    fn record_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
        self.guard(self.inner.record_failure(config, failure), Metadata::default())
    }

    fn record_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
        self.guard(self.inner.record_success(config, at), Metadata::default())
    }

    fn record_recovery_probe_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
        self.guard(
            self.inner.record_recovery_probe_failure(config, failure),
            Metadata::default(),
        )
    }

    fn record_recovery_probe_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
        self.guard(self.inner.record_recovery_probe_success(config, at), Metadata::default())
    }

    fn get_state(&self, config: &Config) -> Result<LockState, BackendError> {
        self.guard(self.inner.get_state(config), LockState::Unlocked)
    }

    fn set_state(&self, config: &Config, state: LockState) -> Result<LockState, BackendError> {
        // On error, report the requested state back so the swap looks like a
        // no-op and callers do not announce a change that never happened.
        self.guard(self.inner.set_state(config, state), state)
    }

    fn clear_state(&self, config: &Config) -> Result<LockState, BackendError> {
        self.guard(self.inner.clear_state(config), LockState::Unlocked)
    }

    fn transition_to_color(&self, config: &Config, color: Color) -> Result<bool, BackendError> {
        self.guard(self.inner.transition_to_color(config, color), false)
    }

    fn names_used_after(&self, time: SystemTime) -> Result<Vec<String>, BackendError> {
        self.guard(self.inner.names_used_after(time), Vec::new())
    }
}
