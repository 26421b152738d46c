// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide default configuration.
//!
//! Applications typically configure the breaker library once at startup:
//!
//! ```
//! use std::time::Duration;
//!
//! use fusebox::Defaults;
//!
//! fusebox::configure(Defaults::new().cool_off_time(Duration::from_secs(30)).threshold(5.0));
//! ```
//!
//! Installation happens at most once. Handles capture configuration by value
//! when they are created, so mutating shared defaults later could never reach
//! existing handles anyway; a second call therefore warns and does nothing
//! instead of silently diverging.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::backend::{MemoryBackend, StateBackend};
use crate::classifier::ErrorClassifier;
use crate::clock::Clock;
use crate::config::Settings;
use crate::notifier::{ErrorNotifier, Notifier};
use crate::{TrafficControl, TrafficRecovery};

static DEFAULTS: OnceLock<Defaults> = OnceLock::new();

/// The process-wide settings layer, sitting between explicit builder calls
/// and library defaults.
#[derive(Clone, Default)]
pub struct Defaults {
    pub(crate) settings: Settings,
}

impl Defaults {
    /// Creates an empty defaults bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default failure threshold for all breakers.
    #[must_use]
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.settings.threshold = Some(threshold);
        self
    }

    /// Default counting window for all breakers.
    #[must_use]
    pub fn window_size(mut self, window_size: Duration) -> Self {
        self.settings.window_size = Some(window_size);
        self
    }

    /// Default cool-off time for all breakers.
    #[must_use]
    pub fn cool_off_time(mut self, cool_off_time: Duration) -> Self {
        self.settings.cool_off_time = Some(cool_off_time);
        self
    }

    /// Default recovery threshold for all breakers.
    #[must_use]
    pub fn recovery_threshold(mut self, recovery_threshold: u32) -> Self {
        self.settings.recovery_threshold = Some(recovery_threshold);
        self
    }

    /// Default tracked-error classifiers for all breakers.
    #[must_use]
    pub fn tracked_errors(mut self, tracked_errors: Vec<ErrorClassifier>) -> Self {
        self.settings.tracked_errors = Some(tracked_errors);
        self
    }

    /// Default skipped-error classifiers for all breakers.
    #[must_use]
    pub fn skipped_errors(mut self, skipped_errors: Vec<ErrorClassifier>) -> Self {
        self.settings.skipped_errors = Some(skipped_errors);
        self
    }

    /// Default traffic-control policy for all breakers.
    #[must_use]
    pub fn traffic_control(mut self, traffic_control: TrafficControl) -> Self {
        self.settings.traffic_control = Some(traffic_control);
        self
    }

    /// Default traffic-recovery policy for all breakers.
    #[must_use]
    pub fn traffic_recovery(mut self, traffic_recovery: TrafficRecovery) -> Self {
        self.settings.traffic_recovery = Some(traffic_recovery);
        self
    }

    /// Default transition observers for all breakers.
    #[must_use]
    pub fn notifiers(mut self, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        self.settings.notifiers = Some(notifiers);
        self
    }

    /// Default error notifier for all breakers.
    #[must_use]
    pub fn error_notifier(mut self, error_notifier: ErrorNotifier) -> Self {
        self.settings.error_notifier = Some(error_notifier);
        self
    }

    /// Default state backend for all breakers.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.settings.backend = Some(backend);
        self
    }

    /// Default time source for all breakers.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.settings.clock = Some(clock);
        self
    }
}

impl fmt::Debug for Defaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Defaults").finish_non_exhaustive()
    }
}

/// Installs the process-wide defaults, once.
///
/// Configurations built afterwards fall through to these defaults for any
/// setting their builder leaves unset. Calling this a second time warns and
/// leaves the installed defaults untouched.
pub fn configure(defaults: Defaults) {
    if DEFAULTS.set(defaults).is_err() {
        tracing::warn!("process-wide circuit breaker defaults are already installed; ignoring reconfiguration");
    }
}

/// The installed defaults, if any.
pub(crate) fn process_defaults() -> Option<&'static Defaults> {
    DEFAULTS.get()
}

/// The backend used when none is configured: one memory backend shared by the
/// whole process, so every handle for a given name observes the same state.
pub(crate) fn shared_memory_backend() -> Arc<dyn StateBackend> {
    static BACKEND: OnceLock<Arc<MemoryBackend>> = OnceLock::new();
    Arc::clone(BACKEND.get_or_init(|| Arc::new(MemoryBackend::new()))) as Arc<dyn StateBackend>
}
