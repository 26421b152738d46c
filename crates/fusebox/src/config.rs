// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Immutable per-breaker configuration.
//!
//! A [`Config`] is built once per breaker name and never mutated afterwards;
//! deriving a changed configuration always produces a new value, so existing
//! handles keep the configuration they captured. Settings merge from three
//! layers, highest precedence first: explicit builder calls, process-wide
//! defaults installed through [`configure`][crate::configure], and library
//! defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::StateBackend;
use crate::classifier::ErrorClassifier;
use crate::clock::Clock;
use crate::defaults;
use crate::notifier::{ErrorNotifier, Notifier, default_error_notifier};
use crate::{ConfigError, TrafficControl, TrafficRecovery};

/// The immutable settings bundle a breaker handle carries.
#[derive(Clone)]
pub struct Config {
    name: Arc<str>,
    pub(crate) threshold: f64,
    pub(crate) window_size: Option<Duration>,
    pub(crate) cool_off_time: Duration,
    pub(crate) recovery_threshold: u32,
    pub(crate) tracked_errors: Arc<[ErrorClassifier]>,
    pub(crate) skipped_errors: Arc<[ErrorClassifier]>,
    pub(crate) traffic_control: TrafficControl,
    pub(crate) traffic_recovery: TrafficRecovery,
    pub(crate) notifiers: Arc<[Arc<dyn Notifier>]>,
    pub(crate) error_notifier: ErrorNotifier,
    pub(crate) backend: Arc<dyn StateBackend>,
    pub(crate) clock: Clock,
}

impl Config {
    /// Library default failure threshold.
    pub const DEFAULT_THRESHOLD: f64 = 3.0;
    /// Library default cool-off time.
    pub const DEFAULT_COOL_OFF_TIME: Duration = Duration::from_secs(60);
    /// Library default recovery threshold.
    pub const DEFAULT_RECOVERY_THRESHOLD: u32 = 1;

    /// Starts building a configuration for the named breaker.
    pub fn builder(name: impl Into<Arc<str>>) -> ConfigBuilder {
        ConfigBuilder {
            name: name.into(),
            settings: Settings::default(),
        }
    }

    /// The breaker's name. Required and immutable.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The failure threshold; a count or a rate depending on the policy.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The trailing span over which outcomes are counted; `None` is infinite.
    #[must_use]
    pub fn window_size(&self) -> Option<Duration> {
        self.window_size
    }

    /// How long an opened breaker waits before allowing a probe.
    #[must_use]
    pub fn cool_off_time(&self) -> Duration {
        self.cool_off_time
    }

    /// How many probe successes recovery requires.
    #[must_use]
    pub fn recovery_threshold(&self) -> u32 {
        self.recovery_threshold
    }

    /// Classifiers for errors the breaker records, in evaluation order.
    #[must_use]
    pub fn tracked_errors(&self) -> &[ErrorClassifier] {
        &self.tracked_errors
    }

    /// Classifiers for errors the breaker must ignore, evaluated before the
    /// tracked list.
    #[must_use]
    pub fn skipped_errors(&self) -> &[ErrorClassifier] {
        &self.skipped_errors
    }

    /// The policy deciding when to open.
    #[must_use]
    pub fn traffic_control(&self) -> &TrafficControl {
        &self.traffic_control
    }

    /// The policy deciding when to close again.
    #[must_use]
    pub fn traffic_recovery(&self) -> &TrafficRecovery {
        &self.traffic_recovery
    }

    /// The transition observers.
    #[must_use]
    pub fn notifiers(&self) -> &[Arc<dyn Notifier>] {
        &self.notifiers
    }

    /// The escape hatch for backend and notifier failures.
    #[must_use]
    pub fn error_notifier(&self) -> &ErrorNotifier {
        &self.error_notifier
    }

    /// The shared state backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    /// The time source.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Re-checks invariants after a field changed; used by handle derivation.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.traffic_control.check_compatibility(self.threshold)?;
        if self.recovery_threshold == 0 {
            return Err(ConfigError::ZeroRecoveryThreshold);
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("threshold", &self.threshold)
            .field("window_size", &self.window_size)
            .field("cool_off_time", &self.cool_off_time)
            .field("recovery_threshold", &self.recovery_threshold)
            .field("tracked_errors", &self.tracked_errors)
            .field("skipped_errors", &self.skipped_errors)
            .field("traffic_control", &self.traffic_control)
            .field("traffic_recovery", &self.traffic_recovery)
            .field("notifiers", &self.notifiers)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// The optional layer of settings shared by [`ConfigBuilder`] and the
/// process-wide defaults; unset fields fall through to the next layer.
#[derive(Clone, Default)]
pub(crate) struct Settings {
    pub(crate) threshold: Option<f64>,
    pub(crate) window_size: Option<Duration>,
    pub(crate) cool_off_time: Option<Duration>,
    pub(crate) recovery_threshold: Option<u32>,
    pub(crate) tracked_errors: Option<Vec<ErrorClassifier>>,
    pub(crate) skipped_errors: Option<Vec<ErrorClassifier>>,
    pub(crate) traffic_control: Option<TrafficControl>,
    pub(crate) traffic_recovery: Option<TrafficRecovery>,
    pub(crate) notifiers: Option<Vec<Arc<dyn Notifier>>>,
    pub(crate) error_notifier: Option<ErrorNotifier>,
    pub(crate) backend: Option<Arc<dyn StateBackend>>,
    pub(crate) clock: Option<Clock>,
}

impl Settings {
    /// Fills unset fields from a lower-precedence layer.
    fn or(mut self, fallback: &Self) -> Self {
        self.threshold = self.threshold.or(fallback.threshold);
        self.window_size = self.window_size.or(fallback.window_size);
        self.cool_off_time = self.cool_off_time.or(fallback.cool_off_time);
        self.recovery_threshold = self.recovery_threshold.or(fallback.recovery_threshold);
        self.tracked_errors = self.tracked_errors.or_else(|| fallback.tracked_errors.clone());
        self.skipped_errors = self.skipped_errors.or_else(|| fallback.skipped_errors.clone());
        self.traffic_control = self.traffic_control.or_else(|| fallback.traffic_control.clone());
        self.traffic_recovery = self.traffic_recovery.or(fallback.traffic_recovery);
        self.notifiers = self.notifiers.or_else(|| fallback.notifiers.clone());
        self.error_notifier = self.error_notifier.or_else(|| fallback.error_notifier.clone());
        self.backend = self.backend.or_else(|| fallback.backend.clone());
        self.clock = self.clock.or_else(|| fallback.clock.clone());
        self
    }
}

/// Builds a [`Config`], layering explicit settings over process and library
/// defaults.
pub struct ConfigBuilder {
    name: Arc<str>,
    settings: Settings,
}

impl ConfigBuilder {
    /// Sets the failure threshold.
    #[must_use]
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.settings.threshold = Some(threshold);
        self
    }

    /// Sets the counting window. Unset means infinite.
    #[must_use]
    pub fn window_size(mut self, window_size: Duration) -> Self {
        self.settings.window_size = Some(window_size);
        self
    }

    /// Sets the cool-off time before a probe is attempted.
    #[must_use]
    pub fn cool_off_time(mut self, cool_off_time: Duration) -> Self {
        self.settings.cool_off_time = Some(cool_off_time);
        self
    }

    /// Sets the number of probe successes recovery requires.
    #[must_use]
    pub fn recovery_threshold(mut self, recovery_threshold: u32) -> Self {
        self.settings.recovery_threshold = Some(recovery_threshold);
        self
    }

    /// Sets the ordered classifiers for errors the breaker records.
    #[must_use]
    pub fn tracked_errors(mut self, tracked_errors: Vec<ErrorClassifier>) -> Self {
        self.settings.tracked_errors = Some(tracked_errors);
        self
    }

    /// Sets the ordered classifiers for errors the breaker ignores.
    #[must_use]
    pub fn skipped_errors(mut self, skipped_errors: Vec<ErrorClassifier>) -> Self {
        self.settings.skipped_errors = Some(skipped_errors);
        self
    }

    /// Sets the policy deciding when to open.
    #[must_use]
    pub fn traffic_control(mut self, traffic_control: TrafficControl) -> Self {
        self.settings.traffic_control = Some(traffic_control);
        self
    }

    /// Sets the policy deciding when to close again.
    #[must_use]
    pub fn traffic_recovery(mut self, traffic_recovery: TrafficRecovery) -> Self {
        self.settings.traffic_recovery = Some(traffic_recovery);
        self
    }

    /// Sets the transition observers.
    #[must_use]
    pub fn notifiers(mut self, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        self.settings.notifiers = Some(notifiers);
        self
    }

    /// Sets the escape hatch for backend and notifier failures.
    #[must_use]
    pub fn error_notifier(mut self, error_notifier: ErrorNotifier) -> Self {
        self.settings.error_notifier = Some(error_notifier);
        self
    }

    /// Sets the shared state backend.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.settings.backend = Some(backend);
        self
    }

    /// Sets the time source.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.settings.clock = Some(clock);
        self
    }

    /// Merges the layers and validates the result.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for incompatible policy/threshold
    /// combinations, exactly once at build time.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut settings = self.settings;
        if let Some(process) = defaults::process_defaults() {
            settings = settings.or(&process.settings);
        }

        let config = Config {
            name: self.name,
            threshold: settings.threshold.unwrap_or(Config::DEFAULT_THRESHOLD),
            window_size: settings.window_size,
            cool_off_time: settings.cool_off_time.unwrap_or(Config::DEFAULT_COOL_OFF_TIME),
            recovery_threshold: settings
                .recovery_threshold
                .unwrap_or(Config::DEFAULT_RECOVERY_THRESHOLD),
            tracked_errors: settings
                .tracked_errors
                .unwrap_or_else(|| vec![ErrorClassifier::any()])
                .into(),
            skipped_errors: settings.skipped_errors.unwrap_or_default().into(),
            traffic_control: settings.traffic_control.unwrap_or_default(),
            traffic_recovery: settings.traffic_recovery.unwrap_or_default(),
            notifiers: settings.notifiers.unwrap_or_default().into(),
            error_notifier: settings.error_notifier.unwrap_or_else(default_error_notifier),
            backend: settings.backend.unwrap_or_else(defaults::shared_memory_backend),
            clock: settings.clock.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder").field("name", &self.name).finish_non_exhaustive()
    }
}
