// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end breaker scenarios driven through the public API.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fusebox::backend::{MemoryBackend, StateBackend};
use fusebox::clock::ClockControl;
use fusebox::{
    BackendError, CircuitBreaker, Color, Config, ConfigBuilder, Failure, LockState, Metadata, Notifier, NotifierError,
    RunError, TrafficControl, TrafficRecovery,
};

#[derive(Debug, thiserror::Error)]
#[error("upstream unavailable")]
struct Upstream;

#[derive(Debug, thiserror::Error)]
#[error("bad request")]
struct BadRequest;

#[derive(Debug, Default)]
struct Recording {
    seen: Mutex<Vec<(Color, Color)>>,
}

impl Recording {
    fn transitions(&self) -> Vec<(Color, Color)> {
        self.seen.lock().unwrap().clone()
    }
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

struct Scenario {
    breaker: CircuitBreaker,
    clock: ClockControl,
    notifier: Arc<Recording>,
}

fn scenario(name: &str, configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Scenario {
    let clock = ClockControl::new();
    let notifier = Arc::new(Recording::default());
    let builder = Config::builder(name.to_owned())
        .backend(Arc::new(MemoryBackend::with_clock(clock.to_clock())))
        .clock(clock.to_clock())
        .notifiers(vec![Arc::clone(&notifier) as Arc<dyn Notifier>]);
    Scenario {
        breaker: CircuitBreaker::new(configure(builder).build().unwrap()),
        clock,
        notifier,
    }
}

fn fail(breaker: &CircuitBreaker) {
    let result: Result<(), _> = breaker.run(|| Err(Upstream));
    assert!(result.is_err());
}

fn succeed(breaker: &CircuitBreaker) {
    breaker.run(|| Ok::<_, Upstream>(())).unwrap();
}

#[test]
fn single_success_recovery_closes_after_one_good_probe() {
    let Scenario {
        breaker,
        clock,
        notifier,
    } = scenario("single-success", |builder| {
        builder
            .threshold(1.0)
            .cool_off_time(Duration::from_secs(5))
            .traffic_recovery(TrafficRecovery::SingleSuccess)
    });

    fail(&breaker);
    assert_eq!(breaker.color(), Color::Red);

    clock.advance(Duration::from_secs(6));
    assert_eq!(breaker.color(), Color::Yellow);

    succeed(&breaker);
    assert_eq!(breaker.color(), Color::Green);
    assert_eq!(breaker.metadata().failures, 0, "closing resets failure counts");

    let closings = notifier
        .transitions()
        .into_iter()
        .filter(|(_, to)| *to == Color::Green)
        .count();
    assert_eq!(closings, 1, "one logical closing, one notification");
}

#[test]
fn consecutive_successes_recovery_restarts_on_a_failed_probe() {
    let Scenario { breaker, clock, .. } = scenario("consecutive-successes", |builder| {
        builder
            .threshold(1.0)
            .cool_off_time(Duration::from_secs(5))
            .recovery_threshold(2)
            .traffic_recovery(TrafficRecovery::ConsecutiveSuccesses)
    });

    fail(&breaker);
    clock.advance(Duration::from_secs(6));
    assert_eq!(breaker.color(), Color::Yellow);

    succeed(&breaker);
    assert_eq!(breaker.color(), Color::Yellow, "one of two required probes");

    fail(&breaker);
    assert_eq!(breaker.color(), Color::Red, "a failed probe reopens immediately");

    clock.advance(Duration::from_secs(5));
    succeed(&breaker);
    succeed(&breaker);
    assert_eq!(breaker.color(), Color::Green);
}

#[test]
fn error_rate_breaches_only_past_the_threshold() {
    let run = |successes: usize, failures: usize| {
        let Scenario { breaker, .. } = scenario("error-rate", |builder| {
            builder
                .threshold(0.3)
                .traffic_control(TrafficControl::ErrorRate { min_sample_size: 10 })
        });
        for _ in 0..successes {
            succeed(&breaker);
        }
        for _ in 0..failures {
            fail(&breaker);
        }
        breaker.color()
    };

    assert_eq!(run(7, 3), Color::Green, "30% of 10 sits exactly at the threshold");
    assert_eq!(run(6, 4), Color::Red, "40% of 10 exceeds it");
}

#[test]
fn error_rate_waits_for_the_minimum_sample() {
    let Scenario { breaker, .. } = scenario("error-rate-sample", |builder| {
        builder
            .threshold(0.3)
            .traffic_control(TrafficControl::ErrorRate { min_sample_size: 10 })
    });
    for _ in 0..9 {
        fail(&breaker);
    }
    assert_eq!(breaker.color(), Color::Green, "nine calls are not a sample of ten");

    fail(&breaker);
    assert_eq!(breaker.color(), Color::Red);
}

#[test]
fn skipped_errors_pass_through_a_breaker_untouched() {
    let Scenario { breaker, notifier, .. } = scenario("skipped", |builder| {
        builder
            .threshold(1.0)
            .skipped_errors(vec![fusebox::ErrorClassifier::of::<BadRequest>()])
    });

    for _ in 0..5 {
        let result: Result<(), _> = breaker.run(|| Err(BadRequest));
        assert!(matches!(result, Err(RunError::Service(BadRequest))));
    }

    assert_eq!(breaker.color(), Color::Green);
    let metadata = breaker.metadata();
    assert_eq!(metadata.failures, 0);
    assert_eq!(metadata.successes, 0, "skipped errors are not successes either");
    assert!(notifier.transitions().is_empty());
}

#[test]
fn replaying_counter_state_replays_color() {
    let Scenario { breaker, clock, .. } = scenario("replay", |builder| {
        builder.threshold(1.0).cool_off_time(Duration::from_secs(5))
    });
    fail(&breaker);
    clock.advance(Duration::from_secs(2));

    let metadata = breaker.metadata();
    let now = clock.to_clock().system_time();
    assert_eq!(metadata.color(breaker.config(), now), breaker.color());
    assert_eq!(
        metadata.color(breaker.config(), now + Duration::from_secs(10)),
        Color::Yellow,
        "the same snapshot read later derives the later color"
    );
}

/// A backend that always fails, standing in for an unreachable store.
#[derive(Debug)]
struct Unreachable;

impl StateBackend for Unreachable {
    fn names(&self) -> Result<Vec<String>, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn get_metadata(&self, _: &Config) -> Result<Metadata, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn record_failure(&self, _: &Config, _: &Failure) -> Result<Metadata, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn record_success(&self, _: &Config, _: SystemTime) -> Result<Metadata, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn record_recovery_probe_failure(&self, _: &Config, _: &Failure) -> Result<Metadata, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn record_recovery_probe_success(&self, _: &Config, _: SystemTime) -> Result<Metadata, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn get_state(&self, _: &Config) -> Result<LockState, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn set_state(&self, _: &Config, _: LockState) -> Result<LockState, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn clear_state(&self, _: &Config) -> Result<LockState, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn transition_to_color(&self, _: &Config, _: Color) -> Result<bool, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }

    fn names_used_after(&self, _: SystemTime) -> Result<Vec<String>, BackendError> {
        Err(BackendError::from_message("connection refused"))
    }
}

#[test]
fn a_dead_backend_degrades_instead_of_breaking_calls() {
    let reports = Arc::new(Mutex::new(0_usize));
    let sink = Arc::clone(&reports);
    let breaker = CircuitBreaker::new(
        Config::builder("degraded")
            .backend(Arc::new(Unreachable))
            .error_notifier(Arc::new(move |_| {
                *sink.lock().unwrap() += 1;
            }))
            .build()
            .unwrap(),
    );

    assert_eq!(breaker.run(|| Ok::<_, Upstream>(9)).unwrap(), 9);
    assert_eq!(breaker.color(), Color::Green, "a default snapshot reads green");
    assert!(*reports.lock().unwrap() > 0, "backend trouble is reported");

    let result: Result<(), _> = breaker.run(|| Err(Upstream));
    assert!(matches!(result, Err(RunError::Service(Upstream))), "calls still run and re-raise");
}

#[test]
fn derived_handles_share_the_backend_state() {
    let Scenario { breaker, .. } = scenario("derived-shared", |builder| builder.threshold(2.0));
    let stricter = breaker.with_threshold(1.0).unwrap();

    fail(&stricter);
    assert_eq!(stricter.color(), Color::Red);
    assert_eq!(breaker.color(), Color::Red, "both handles read the same committed breach");
}
