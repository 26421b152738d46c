// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests against a live Redis server.
//!
//! All tests are ignored by default; run them with a reachable server:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1/ cargo test -p fusebox_redis -- --ignored
//! ```
//!
//! Every test uses its own key prefix, so suites can run concurrently against
//! a shared server without stepping on each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fusebox::backend::StateBackend;
use fusebox::clock::ClockControl;
use fusebox::{CircuitBreaker, Color, Config, ConfigBuilder, Failure, LockState};
use fusebox_redis::RedisBackend;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_owned())
}

fn unique_prefix(test: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    format!("fusebox-test-{test}-{}-{nanos}", std::process::id())
}

fn backend(prefix: &str) -> Arc<RedisBackend> {
    Arc::new(
        RedisBackend::builder(redis_url())
            .prefix(prefix)
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap(),
    )
}

fn config(name: &str, prefix: &str, clock: &ClockControl) -> Config {
    builder(name, prefix, clock).build().unwrap()
}

fn builder(name: &str, prefix: &str, clock: &ClockControl) -> ConfigBuilder {
    Config::builder(name.to_owned())
        .backend(backend(prefix))
        .clock(clock.to_clock())
}

#[test]
#[ignore = "requires a live redis server"]
fn recorded_outcomes_come_back_in_the_snapshot() {
    let prefix = unique_prefix("snapshot");
    let clock = ClockControl::new();
    let config = config("orders", &prefix, &clock);
    let backend = backend(&prefix);

    let now = clock.to_clock().system_time();
    backend.record_success(&config, now).unwrap();
    let failure = Failure::new("io::Error", "connection reset", now);
    let metadata = backend.record_failure(&config, &failure).unwrap();

    assert_eq!(metadata.successes, 1);
    assert_eq!(metadata.failures, 1);
    assert_eq!(metadata.consecutive_failures, 1);
    assert_eq!(metadata.consecutive_successes, 0);
    assert_eq!(metadata.last_failure, Some(failure));
    assert_eq!(metadata.locked_state, LockState::Unlocked);
}

#[test]
#[ignore = "requires a live redis server"]
fn two_backends_share_one_breaker() {
    let prefix = unique_prefix("shared");
    let clock = ClockControl::new();
    let first = builder("payments", &prefix, &clock).threshold(1.0).build().unwrap();
    let second = builder("payments", &prefix, &clock).threshold(1.0).build().unwrap();

    let breaker = CircuitBreaker::new(first);
    let result: Result<(), _> = breaker.run(|| Err(std::io::Error::other("boom")));
    assert!(result.is_err());
    assert_eq!(breaker.color(), Color::Red);

    let sibling = CircuitBreaker::new(second);
    assert_eq!(sibling.color(), Color::Red, "a separate handle reads the same state");
}

#[test]
#[ignore = "requires a live redis server"]
fn window_pruning_happens_server_side() {
    let prefix = unique_prefix("window");
    let clock = ClockControl::new();
    let config = builder("windowed", &prefix, &clock)
        .threshold(0.5)
        .traffic_control(fusebox::TrafficControl::ErrorRate { min_sample_size: 1 })
        .window_size(Duration::from_secs(60))
        .build()
        .unwrap();
    let backend = backend(&prefix);

    let now = clock.to_clock().system_time();
    let failure = Failure::new("io::Error", "old failure", now);
    backend.record_failure(&config, &failure).unwrap();

    clock.advance(Duration::from_secs(61));
    let metadata = backend.get_metadata(&config).unwrap();
    assert_eq!(metadata.failures, 0, "entries older than the window are pruned");
}

#[test]
#[ignore = "requires a live redis server"]
fn exactly_one_process_wins_a_transition() {
    let prefix = unique_prefix("transition");
    let clock = ClockControl::new();
    let config = Arc::new(config("raced", &prefix, &clock));

    let wins = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let config = Arc::clone(&config);
            let wins = Arc::clone(&wins);
            let backend = backend(&prefix);
            std::thread::spawn(move || {
                if backend.transition_to_color(&config, Color::Red).unwrap() {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
}

#[test]
#[ignore = "requires a live redis server"]
fn lock_tokens_survive_the_round_trip() {
    let prefix = unique_prefix("locks");
    let clock = ClockControl::new();
    let config = config("locked", &prefix, &clock);
    let backend = backend(&prefix);

    assert_eq!(backend.get_state(&config).unwrap(), LockState::Unlocked);
    assert_eq!(backend.set_state(&config, LockState::LockedRed).unwrap(), LockState::Unlocked);
    assert_eq!(backend.get_state(&config).unwrap(), LockState::LockedRed);
    assert_eq!(backend.set_state(&config, LockState::LockedGreen).unwrap(), LockState::LockedRed);
    assert_eq!(backend.clear_state(&config).unwrap(), LockState::LockedGreen);
    assert_eq!(backend.get_state(&config).unwrap(), LockState::Unlocked);
}

#[test]
#[ignore = "requires a live redis server"]
fn names_report_every_breaker_seen() {
    let prefix = unique_prefix("names");
    let clock = ClockControl::new();
    clock.advance(Duration::from_secs(100));
    let first = config("first", &prefix, &clock);
    let backend = backend(&prefix);

    let now = clock.to_clock().system_time();
    backend.record_success(&first, now).unwrap();

    clock.advance(Duration::from_secs(100));
    let second = config("second", &prefix, &clock);
    backend.record_success(&second, clock.to_clock().system_time()).unwrap();

    let mut names = backend.names().unwrap();
    names.sort();
    assert_eq!(names, vec!["first".to_owned(), "second".to_owned()]);

    let recent = backend.names_used_after(now + Duration::from_secs(50)).unwrap();
    assert_eq!(recent, vec!["second".to_owned()]);
}

#[test]
#[ignore = "requires a live redis server"]
fn a_full_breaker_cycle_runs_against_redis() {
    let prefix = unique_prefix("cycle");
    let clock = ClockControl::new();
    let breaker = CircuitBreaker::new(
        builder("cycle", &prefix, &clock)
            .threshold(1.0)
            .cool_off_time(Duration::from_secs(5))
            .build()
            .unwrap(),
    );

    let result: Result<(), _> = breaker.run(|| Err(std::io::Error::other("boom")));
    assert!(result.is_err());
    assert_eq!(breaker.color(), Color::Red);

    clock.advance(Duration::from_secs(6));
    assert_eq!(breaker.color(), Color::Yellow);

    breaker.run(|| Ok::<_, std::io::Error>(())).unwrap();
    assert_eq!(breaker.color(), Color::Green);
    assert_eq!(breaker.metadata().failures, 0);
}
