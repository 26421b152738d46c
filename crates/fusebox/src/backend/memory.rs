// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-process backend.

use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

use parking_lot::Mutex;

use super::StateBackend;
use crate::clock::Clock;
use crate::{BackendError, Color, Config, Failure, LockState, Metadata};

/// In-process breaker storage.
///
/// One mutex guards the whole name-keyed map, so every read-modify-write
/// sequence is trivially atomic and `transition_to_color` is a genuine
/// compare-and-set. Suitable for non-distributed deployments and tests; for
/// state shared across processes use a shared backend such as
/// `fusebox_redis::RedisBackend`.
#[derive(Debug)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, BreakerRecord>>,
    clock: Clock,
}

#[derive(Debug, Default)]
struct BreakerRecord {
    /// Failure entries inside the window, oldest first. Unused (empty) when
    /// the window is infinite; totals carry the counts instead.
    failure_entries: VecDeque<Failure>,
    /// Success event times inside the window, oldest first.
    success_entries: VecDeque<SystemTime>,
    failures_total: u64,
    successes_total: u64,
    consecutive_failures: u64,
    consecutive_successes: u64,
    recovery_probe_failures: u32,
    recovery_probe_successes: u32,
    last_failure_at: Option<SystemTime>,
    last_success_at: Option<SystemTime>,
    last_failure: Option<Failure>,
    breached_at: Option<SystemTime>,
    recovery_started_at: Option<SystemTime>,
    recovery_scheduled_after: Option<SystemTime>,
    locked: LockState,
    last_transition: Option<Color>,
    last_used_at: Option<SystemTime>,
}

impl BreakerRecord {
    /// Drops window entries older than the configured window.
    fn prune(&mut self, config: &Config, now: SystemTime) {
        let Some(window) = config.window_size() else {
            return;
        };
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while self.failure_entries.front().is_some_and(|f| f.time() < cutoff) {
            self.failure_entries.pop_front();
        }
        while self.success_entries.front().is_some_and(|at| *at < cutoff) {
            self.success_entries.pop_front();
        }
    }

    fn snapshot(&mut self, config: &Config, now: SystemTime) -> Metadata {
        self.prune(config, now);
        let windowed = config.window_size().is_some();
        Metadata {
            successes: if windowed {
                self.success_entries.len() as u64
            } else {
                self.successes_total
            },
            failures: if windowed {
                self.failure_entries.len() as u64
            } else {
                self.failures_total
            },
            recovery_probe_successes: self.recovery_probe_successes,
            recovery_probe_failures: self.recovery_probe_failures,
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
            last_failure: self.last_failure.clone(),
            consecutive_successes: self.consecutive_successes,
            consecutive_failures: self.consecutive_failures,
            recovery_started_at: self.recovery_started_at,
            breached_at: self.breached_at,
            recovery_scheduled_after: self.recovery_scheduled_after,
            locked_state: self.locked,
        }
    }
}

impl MemoryBackend {
    /// Creates a backend on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::system())
    }

    /// Creates a backend on the given clock; controlled clocks make window
    /// and cool-off behavior deterministic in tests.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn with_record<T>(&self, config: &Config, op: impl FnOnce(&mut BreakerRecord, SystemTime) -> T) -> T {
        let now = self.clock.system_time();
        let mut records = self.records.lock();
        let record = records.entry(config.name().to_owned()).or_default();
        op(record, now)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBackend for MemoryBackend {
    fn names(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.records.lock().keys().cloned().collect())
    }

    fn get_metadata(&self, config: &Config) -> Result<Metadata, BackendError> {
        Ok(self.with_record(config, |record, now| record.snapshot(config, now)))
    }

    fn record_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
        Ok(self.with_record(config, |record, now| {
            record.failures_total += 1;
            record.consecutive_failures += 1;
            record.consecutive_successes = 0;
            record.last_failure_at = Some(failure.time());
            record.last_failure = Some(failure.clone());
            if config.window_size().is_some() {
                record.failure_entries.push_back(failure.clone());
                record.prune(config, now);
                if let Some(bound) = config.traffic_control().failure_entry_bound(config) {
                    while record.failure_entries.len() > bound {
                        record.failure_entries.pop_front();
                    }
                }
            }
            record.last_used_at = Some(now);
            record.snapshot(config, now)
        }))
    }

    fn record_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
        Ok(self.with_record(config, |record, now| {
            record.successes_total += 1;
            record.consecutive_successes += 1;
            record.consecutive_failures = 0;
            record.last_success_at = Some(at);
            if config.window_size().is_some() {
                record.success_entries.push_back(at);
                record.prune(config, now);
            }
            record.last_used_at = Some(now);
            record.snapshot(config, now)
        }))
    }

    fn record_recovery_probe_failure(&self, config: &Config, failure: &Failure) -> Result<Metadata, BackendError> {
        Ok(self.with_record(config, |record, now| {
            record.recovery_probe_failures += 1;
            record.last_failure_at = Some(failure.time());
            record.last_failure = Some(failure.clone());
            record.last_used_at = Some(now);
            record.snapshot(config, now)
        }))
    }

    fn record_recovery_probe_success(&self, config: &Config, at: SystemTime) -> Result<Metadata, BackendError> {
        Ok(self.with_record(config, |record, now| {
            record.recovery_probe_successes += 1;
            record.last_success_at = Some(at);
            record.last_used_at = Some(now);
            record.snapshot(config, now)
        }))
    }

    fn get_state(&self, config: &Config) -> Result<LockState, BackendError> {
        Ok(self
            .records
            .lock()
            .get(config.name())
            .map_or(LockState::Unlocked, |record| record.locked))
    }

    fn set_state(&self, config: &Config, state: LockState) -> Result<LockState, BackendError> {
        Ok(self.with_record(config, |record, now| {
            record.last_used_at = Some(now);
            std::mem::replace(&mut record.locked, state)
        }))
    }

    fn clear_state(&self, config: &Config) -> Result<LockState, BackendError> {
        self.set_state(config, LockState::Unlocked)
    }

    fn transition_to_color(&self, config: &Config, color: Color) -> Result<bool, BackendError> {
        Ok(self.with_record(config, |record, now| {
            if record.last_transition == Some(color) {
                return false;
            }
            match color {
                Color::Green => {
                    record.failure_entries.clear();
                    record.failures_total = 0;
                    record.consecutive_failures = 0;
                    record.recovery_probe_failures = 0;
                    record.recovery_probe_successes = 0;
                    record.breached_at = None;
                    record.recovery_started_at = None;
                    record.recovery_scheduled_after = None;
                }
                Color::Yellow => {
                    record.recovery_started_at = Some(now);
                    record.recovery_probe_failures = 0;
                    record.recovery_probe_successes = 0;
                }
                Color::Red => {
                    if record.recovery_started_at.take().is_some() {
                        // A probe failure re-opened the breaker.
                        record.recovery_scheduled_after = Some(now + config.cool_off_time());
                        record.recovery_probe_failures = 0;
                        record.recovery_probe_successes = 0;
                    } else if record.breached_at.is_none() {
                        record.breached_at = Some(now);
                    }
                }
            }
            record.last_transition = Some(color);
            record.last_used_at = Some(now);
            true
        }))
    }

    fn names_used_after(&self, time: SystemTime) -> Result<Vec<String>, BackendError> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|(_, record)| record.last_used_at.is_some_and(|at| at >= time))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
