// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The breaker handle callers hold.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FailSafe, StateBackend};
use crate::classifier::ErrorClassifier;
use crate::notifier::{Notifier, notify_all};
use crate::{
    Color, Config, ConfigError, LockError, LockState, Metadata, RunError, TrafficControl, TrafficRecovery, strategy,
};

/// A named circuit breaker.
///
/// The handle is a thin, cheaply clonable wrapper around one immutable
/// [`Config`]; all durable state lives in the configured backend, keyed by the
/// breaker's name. Two handles with the same name and backend therefore
/// describe the same breaker, even across processes.
///
/// ```
/// use fusebox::{CircuitBreaker, Config};
///
/// let breaker = CircuitBreaker::new(Config::builder("payments-api").build()?);
/// let response = breaker.run(|| charge_card());
/// # fn charge_card() -> Result<(), std::io::Error> { Ok(()) }
/// # assert!(response.is_ok());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<Config>,
}

impl CircuitBreaker {
    /// Creates a handle around an already-built configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Creates a handle for `name` using process-wide and library defaults.
    pub fn with_defaults(name: impl Into<Arc<str>>) -> Result<Self, ConfigError> {
        Ok(Self::new(Config::builder(name).build()?))
    }

    /// The configuration this handle is bound to.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Runs `f` under the breaker's supervision.
    ///
    /// While the breaker is green the call runs and its outcome is recorded.
    /// While it is yellow the call runs as a recovery probe. While it is red
    /// the call never runs and [`RunError::Open`] is returned. Tracked errors
    /// are re-raised as [`RunError::Service`] after bookkeeping; skipped and
    /// untracked errors are re-raised untouched.
    pub fn run<T, E, F>(&self, f: F) -> Result<T, RunError<E>>
    where
        E: Error + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        self.dispatch(None::<fn(Option<&E>) -> T>, f)
    }

    /// Runs `f` under the breaker's supervision with a fallback value.
    ///
    /// The fallback is consulted instead of returning an error: with
    /// `Some(&error)` when a tracked error occurred, with `None` when the
    /// call was blocked while red. Skipped and untracked errors bypass the
    /// fallback and re-raise.
    pub fn run_with_fallback<T, E, F, FB>(&self, fallback: FB, f: F) -> Result<T, RunError<E>>
    where
        E: Error + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
        FB: FnOnce(Option<&E>) -> T,
    {
        self.dispatch(Some(fallback), f)
    }

    fn dispatch<T, E, F, FB>(&self, fallback: Option<FB>, f: F) -> Result<T, RunError<E>>
    where
        E: Error + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
        FB: FnOnce(Option<&E>) -> T,
    {
        let backend = FailSafe::for_config(&self.config);
        match self.derived_color(&backend) {
            Color::Green => strategy::run_green(&self.config, &backend, fallback, f),
            Color::Yellow => strategy::run_yellow(&self.config, &backend, fallback, f),
            Color::Red => strategy::run_red(&self.config, fallback),
        }
    }

    /// The breaker's current color, derived without side effects.
    #[must_use]
    pub fn color(&self) -> Color {
        self.derived_color(&FailSafe::for_config(&self.config))
    }

    /// A fresh snapshot of the breaker's state.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        FailSafe::for_config(&self.config)
            .get_metadata(&self.config)
            .unwrap_or_default()
    }

    /// Pins the breaker to `color` until [`unlock`][Self::unlock].
    ///
    /// Only [`Color::Green`] and [`Color::Red`] can be locked. Locking is
    /// idempotent, and the atomic flag swap in the backend deduplicates
    /// concurrent lockers: the color the snapshot showed under the replaced
    /// flag is compared with the color under the new one, so only the caller
    /// whose write changed the stored flag can observe a difference and
    /// notify.
    pub fn lock(&self, color: Color) -> Result<(), LockError> {
        let state = match color {
            Color::Green => LockState::LockedGreen,
            Color::Red => LockState::LockedRed,
            Color::Yellow => return Err(LockError::InvalidColor(Color::Yellow)),
        };
        let backend = FailSafe::for_config(&self.config);
        let now = self.config.clock().system_time();
        let mut metadata = backend.get_metadata(&self.config).unwrap_or_default();
        let previous = backend.set_state(&self.config, state).unwrap_or(state);
        metadata.locked_state = previous;
        let before = metadata.color(&self.config, now);
        metadata.locked_state = state;
        let after = metadata.color(&self.config, now);
        if before != after {
            notify_all(&self.config, before, after, None);
        }
        Ok(())
    }

    /// Removes a lock; the color reverts to what the counters dictate.
    ///
    /// Deduplicated the same way as [`lock`][Self::lock]: only the caller
    /// whose swap actually cleared a stored flag can notify.
    pub fn unlock(&self) {
        let backend = FailSafe::for_config(&self.config);
        let now = self.config.clock().system_time();
        let mut metadata = backend.get_metadata(&self.config).unwrap_or_default();
        let previous = backend.clear_state(&self.config).unwrap_or(LockState::Unlocked);
        metadata.locked_state = previous;
        let before = metadata.color(&self.config, now);
        metadata.locked_state = LockState::Unlocked;
        let after = metadata.color(&self.config, now);
        if before != after {
            notify_all(&self.config, before, after, None);
        }
    }

    fn derived_color(&self, backend: &FailSafe) -> Color {
        let metadata = backend.get_metadata(&self.config).unwrap_or_default();
        metadata.color(&self.config, self.config.clock().system_time())
    }

    fn derive(&self, mutate: impl FnOnce(&mut Config)) -> Result<Self, ConfigError> {
        let mut config = (*self.config).clone();
        mutate(&mut config);
        config.validate()?;
        Ok(Self::new(config))
    }

    /// A new handle with a different breach threshold.
    pub fn with_threshold(&self, threshold: f64) -> Result<Self, ConfigError> {
        self.derive(|config| config.threshold = threshold)
    }

    /// A new handle with a different sliding window.
    pub fn with_window_size(&self, window_size: Option<Duration>) -> Result<Self, ConfigError> {
        self.derive(|config| config.window_size = window_size)
    }

    /// A new handle with a different cool-off time.
    pub fn with_cool_off_time(&self, cool_off_time: Duration) -> Result<Self, ConfigError> {
        self.derive(|config| config.cool_off_time = cool_off_time)
    }

    /// A new handle with a different recovery threshold.
    pub fn with_recovery_threshold(&self, recovery_threshold: u32) -> Result<Self, ConfigError> {
        self.derive(|config| config.recovery_threshold = recovery_threshold)
    }

    /// A new handle tracking a different set of errors.
    pub fn with_tracked_errors(&self, tracked_errors: Vec<ErrorClassifier>) -> Result<Self, ConfigError> {
        self.derive(|config| config.tracked_errors = tracked_errors.into())
    }

    /// A new handle skipping a different set of errors.
    pub fn with_skipped_errors(&self, skipped_errors: Vec<ErrorClassifier>) -> Result<Self, ConfigError> {
        self.derive(|config| config.skipped_errors = skipped_errors.into())
    }

    /// A new handle with a different traffic control policy.
    pub fn with_traffic_control(&self, traffic_control: TrafficControl) -> Result<Self, ConfigError> {
        self.derive(|config| config.traffic_control = traffic_control)
    }

    /// A new handle with a different traffic recovery policy.
    pub fn with_traffic_recovery(&self, traffic_recovery: TrafficRecovery) -> Result<Self, ConfigError> {
        self.derive(|config| config.traffic_recovery = traffic_recovery)
    }

    /// A new handle reporting to different notifiers.
    pub fn with_notifiers(&self, notifiers: Vec<Arc<dyn Notifier>>) -> Result<Self, ConfigError> {
        self.derive(|config| config.notifiers = notifiers.into())
    }

    /// A new handle storing state in a different backend.
    pub fn with_backend(&self, backend: Arc<dyn StateBackend>) -> Result<Self, ConfigError> {
        self.derive(|config| config.backend = backend)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Barrier, Mutex};
    use std::time::{Duration, SystemTime};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ClockControl;
    use crate::{BackendError, ErrorClassifier, Failure, NotifierError};

    assert_impl_all!(CircuitBreaker: Send, Sync, Clone);

    #[derive(Debug, thiserror::Error)]
    #[error("service exploded")]
    struct Explosion;

    #[derive(Debug, thiserror::Error)]
    #[error("caller mistake")]
    struct CallerMistake;

    #[derive(Debug, Default)]
    struct Recording {
        seen: Mutex<Vec<(Color, Color)>>,
    }

    impl Notifier for Recording {
        fn notify(
            &self,
            _config: &Config,
            from_color: Color,
            to_color: Color,
            _failure: Option<&Failure>,
        ) -> Result<(), NotifierError> {
            self.seen.lock().unwrap().push((from_color, to_color));
            Ok(())
        }
    }

    struct Fixture {
        breaker: CircuitBreaker,
        clock: ClockControl,
        notifier: Arc<Recording>,
    }

    fn fixture(configure: impl FnOnce(crate::ConfigBuilder) -> crate::ConfigBuilder) -> Fixture {
        let clock = ClockControl::new();
        let notifier = Arc::new(Recording::default());
        let builder = Config::builder("breaker-test")
            .backend(Arc::new(MemoryBackend::with_clock(clock.to_clock())))
            .clock(clock.to_clock())
            .notifiers(vec![Arc::clone(&notifier) as Arc<dyn Notifier>]);
        let breaker = CircuitBreaker::new(configure(builder).build().unwrap());
        Fixture {
            breaker,
            clock,
            notifier,
        }
    }

    fn fail(breaker: &CircuitBreaker) {
        let result: Result<(), _> = breaker.run(|| Err(Explosion));
        assert!(result.is_err());
    }

    #[test]
    fn a_healthy_breaker_stays_green() {
        let Fixture { breaker, .. } = fixture(|builder| builder);
        assert_eq!(breaker.run(|| Ok::<_, Explosion>(7)).unwrap(), 7);
        assert_eq!(breaker.color(), Color::Green);
        assert_eq!(breaker.metadata().successes, 1);
    }

    #[test]
    fn reaching_the_threshold_opens_the_breaker_and_notifies_once() {
        let Fixture { breaker, notifier, .. } = fixture(|builder| builder.threshold(3.0));
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.color(), Color::Green);
        fail(&breaker);
        assert_eq!(breaker.color(), Color::Red);
        assert_eq!(*notifier.seen.lock().unwrap(), vec![(Color::Green, Color::Red)]);
    }

    #[test]
    fn an_open_breaker_rejects_calls_without_running_them() {
        let Fixture { breaker, .. } = fixture(|builder| builder.threshold(1.0));
        fail(&breaker);
        let result: Result<(), RunError<Explosion>> = breaker.run(|| panic!("must not run while red"));
        assert!(matches!(result, Err(RunError::Open { ref name }) if name == "breaker-test"));
    }

    #[test]
    fn an_open_breaker_prefers_the_fallback() {
        let Fixture { breaker, .. } = fixture(|builder| builder.threshold(1.0));
        fail(&breaker);
        let value = breaker
            .run_with_fallback(
                |error| {
                    assert!(error.is_none(), "red rejections carry no error");
                    42
                },
                || Err::<i32, Explosion>(Explosion),
            )
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn a_tracked_failure_reaches_the_fallback_with_the_error() {
        let Fixture { breaker, .. } = fixture(|builder| builder);
        let value = breaker
            .run_with_fallback(
                |error| {
                    assert!(error.is_some());
                    -1
                },
                || Err::<i32, Explosion>(Explosion),
            )
            .unwrap();
        assert_eq!(value, -1);
    }

    #[test]
    fn skipped_errors_reraise_without_bookkeeping() {
        let Fixture { breaker, .. } =
            fixture(|builder| builder.threshold(1.0).skipped_errors(vec![ErrorClassifier::of::<CallerMistake>()]));
        let result: Result<(), _> = breaker.run(|| Err(CallerMistake));
        assert!(matches!(result, Err(RunError::Service(CallerMistake))));
        assert_eq!(breaker.color(), Color::Green);
        assert_eq!(breaker.metadata().failures, 0);
    }

    #[test]
    fn untracked_errors_reraise_without_bookkeeping() {
        let Fixture { breaker, .. } =
            fixture(|builder| builder.threshold(1.0).tracked_errors(vec![ErrorClassifier::of::<Explosion>()]));
        let result: Result<(), _> = breaker.run(|| Err(CallerMistake));
        assert!(matches!(result, Err(RunError::Service(CallerMistake))));
        assert_eq!(breaker.color(), Color::Green);
        assert_eq!(breaker.metadata().failures, 0);
    }

    #[test]
    fn cooled_off_breaker_probes_and_closes_on_success() {
        let Fixture {
            breaker,
            clock,
            notifier,
        } = fixture(|builder| builder.threshold(1.0).cool_off_time(Duration::from_secs(5)));
        fail(&breaker);
        assert_eq!(breaker.color(), Color::Red);

        clock.advance(Duration::from_secs(6));
        assert_eq!(breaker.color(), Color::Yellow);

        assert_eq!(breaker.run(|| Ok::<_, Explosion>("recovered")).unwrap(), "recovered");
        assert_eq!(breaker.color(), Color::Green);
        let metadata = breaker.metadata();
        assert_eq!(metadata.failures, 0, "closing clears failure bookkeeping");

        assert_eq!(
            *notifier.seen.lock().unwrap(),
            vec![
                (Color::Green, Color::Red),
                (Color::Red, Color::Yellow),
                (Color::Yellow, Color::Green),
            ]
        );
    }

    #[test]
    fn failed_probe_reopens_until_the_next_cool_off() {
        let Fixture { breaker, clock, .. } =
            fixture(|builder| builder.threshold(1.0).cool_off_time(Duration::from_secs(5)));
        fail(&breaker);
        clock.advance(Duration::from_secs(6));
        assert_eq!(breaker.color(), Color::Yellow);

        fail(&breaker);
        assert_eq!(breaker.color(), Color::Red);

        clock.advance(Duration::from_secs(5));
        assert_eq!(breaker.color(), Color::Yellow);
    }

    #[test]
    fn consecutive_successes_recovery_needs_every_probe_to_pass() {
        let Fixture { breaker, clock, .. } = fixture(|builder| {
            builder
                .threshold(1.0)
                .cool_off_time(Duration::from_secs(5))
                .recovery_threshold(2)
                .traffic_recovery(TrafficRecovery::ConsecutiveSuccesses)
        });
        fail(&breaker);
        clock.advance(Duration::from_secs(6));

        assert!(breaker.run(|| Ok::<_, Explosion>(())).is_ok());
        assert_eq!(breaker.color(), Color::Yellow, "one probe success is not enough");

        assert!(breaker.run(|| Ok::<_, Explosion>(())).is_ok());
        assert_eq!(breaker.color(), Color::Green);
    }

    #[test]
    fn locking_green_holds_the_breaker_closed_through_failures() {
        let Fixture { breaker, .. } = fixture(|builder| builder.threshold(1.0));
        breaker.lock(Color::Green).unwrap();
        fail(&breaker);
        assert_eq!(breaker.color(), Color::Green, "no breach is committed while locked");

        breaker.unlock();
        assert_eq!(breaker.color(), Color::Green);

        fail(&breaker);
        assert_eq!(breaker.color(), Color::Red, "unlocked, the next failure opens it");
    }

    #[test]
    fn locking_is_idempotent_and_notifies_once() {
        let Fixture { breaker, notifier, .. } = fixture(|builder| builder);
        breaker.lock(Color::Red).unwrap();
        breaker.lock(Color::Red).unwrap();
        assert_eq!(breaker.color(), Color::Red);
        assert_eq!(*notifier.seen.lock().unwrap(), vec![(Color::Green, Color::Red)]);
    }

    /// Delegates to a memory backend but holds every snapshot read at a
    /// barrier, so two concurrent lockers have both read the pre-lock state
    /// before either writes its flag.
    #[derive(Debug)]
    struct HeldSnapshot {
        inner: MemoryBackend,
        barrier: Barrier,
    }

    impl StateBackend for HeldSnapshot {
        fn names(&self) -> Result<Vec<String>, BackendError> {
            self.inner.names()
        }

        fn get_metadata(&self, config: &Config) -> Result<Metadata, BackendError> {
            self.barrier.wait();
            self.inner.get_metadata(config)
        }

        fn record_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
            self.inner.record_failure(config, failure)
        }

        fn record_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
            self.inner.record_success(config, at)
        }

        fn record_recovery_probe_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
            self.inner.record_recovery_probe_failure(config, failure)
        }

        fn record_recovery_probe_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
            self.inner.record_recovery_probe_success(config, at)
        }

        fn get_state(&self, config: &Config) -> Result<LockState, BackendError> {
            self.inner.get_state(config)
        }

        fn set_state(&self, config: &Config, state: LockState) -> Result<LockState, BackendError> {
            self.inner.set_state(config, state)
        }

        fn clear_state(&self, config: &Config) -> Result<LockState, BackendError> {
            self.inner.clear_state(config)
        }

        fn transition_to_color(&self, config: &Config, color: Color) -> Result<bool, BackendError> {
            self.inner.transition_to_color(config, color)
        }

        fn names_used_after(&self, time: SystemTime) -> Result<Vec<String>, BackendError> {
            self.inner.names_used_after(time)
        }
    }

    #[test]
    fn racing_lockers_notify_exactly_once() {
        let notifier = Arc::new(Recording::default());
        let backend = Arc::new(HeldSnapshot {
            inner: MemoryBackend::new(),
            barrier: Barrier::new(2),
        });
        let breaker = CircuitBreaker::new(
            Config::builder("lock-race")
                .backend(Arc::clone(&backend) as _)
                .notifiers(vec![Arc::clone(&notifier) as Arc<dyn Notifier>])
                .build()
                .unwrap(),
        );

        let other = breaker.clone();
        let racer = std::thread::spawn(move || other.lock(Color::Red).unwrap());
        breaker.lock(Color::Red).unwrap();
        racer.join().unwrap();

        assert_eq!(backend.get_state(breaker.config()).unwrap(), LockState::LockedRed);
        assert_eq!(
            *notifier.seen.lock().unwrap(),
            vec![(Color::Green, Color::Red)],
            "only the locker whose write changed the flag notifies"
        );
    }

    #[test]
    fn yellow_cannot_be_locked() {
        let Fixture { breaker, .. } = fixture(|builder| builder);
        assert_eq!(breaker.lock(Color::Yellow), Err(LockError::InvalidColor(Color::Yellow)));
    }

    #[test]
    fn derivation_produces_an_independent_handle() {
        let Fixture { breaker, .. } = fixture(|builder| builder);
        let derived = breaker.with_threshold(5.0).unwrap();
        assert_eq!(breaker.config().threshold(), Config::DEFAULT_THRESHOLD);
        assert_eq!(derived.config().threshold(), 5.0);
    }

    #[test]
    fn derivation_revalidates_the_policy() {
        let Fixture { breaker, .. } = fixture(|builder| builder);
        assert!(breaker.with_threshold(2.5).is_err(), "consecutive failures are whole numbers");
        assert!(breaker.with_recovery_threshold(0).is_err());
    }
}
