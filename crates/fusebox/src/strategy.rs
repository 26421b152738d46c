// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-color execution strategies.
//!
//! The breaker handle derives a color for each call and dispatches here. A
//! green breaker runs the call and keeps the books; a yellow breaker runs it
//! as a recovery probe; a red breaker rejects it outright. All bookkeeping
//! goes through the fail-safe backend wrapper, whose methods never return
//! `Err`, so the `unwrap_or_default` calls below can only ever see `Ok`.

use std::error::Error;

use crate::backend::{FailSafe, StateBackend};
use crate::classifier::{Classification, classify};
use crate::notifier::notify_all;
use crate::{Color, Config, Failure, RunError};

/// Runs the protected call with the breaker closed.
pub(crate) fn run_green<T, E, F, FB>(
    config: &Config,
    backend: &FailSafe,
    fallback: Option<FB>,
    f: F,
) -> Result<T, RunError<E>>
where
    E: Error + Send + Sync + 'static,
    F: FnOnce() -> Result<T, E>,
    FB: FnOnce(Option<&E>) -> T,
{
    match f() {
        Ok(value) => {
            let now = config.clock().system_time();
            backend.record_success(config, now).unwrap_or_default();
            Ok(value)
        }
        Err(error) => match classify(config.skipped_errors(), config.tracked_errors(), &error) {
            Classification::Skipped | Classification::Untracked => Err(RunError::Service(error)),
            Classification::Tracked => {
                let now = config.clock().system_time();
                let failure = Failure::from_error(&error, now);
                let metadata = backend.record_failure(config, &failure).unwrap_or_default();
                if metadata.locked_state.is_unlocked()
                    && config.traffic_control().stop_traffic(config, &metadata)
                    && backend.transition_to_color(config, Color::Red).unwrap_or_default()
                {
                    notify_all(config, Color::Green, Color::Red, Some(&failure));
                }
                match fallback {
                    Some(fallback) => Ok(fallback(Some(&error))),
                    None => Err(RunError::Service(error)),
                }
            }
        },
    }
}

/// Runs the protected call as a recovery probe.
pub(crate) fn run_yellow<T, E, F, FB>(
    config: &Config,
    backend: &FailSafe,
    fallback: Option<FB>,
    f: F,
) -> Result<T, RunError<E>>
where
    E: Error + Send + Sync + 'static,
    F: FnOnce() -> Result<T, E>,
    FB: FnOnce(Option<&E>) -> T,
{
    // Commit Red -> Yellow first so the probe phase is visible to every
    // process; the single winner announces it.
    if backend.transition_to_color(config, Color::Yellow).unwrap_or_default() {
        notify_all(config, Color::Red, Color::Yellow, None);
    }
    match f() {
        Ok(value) => {
            let now = config.clock().system_time();
            let metadata = backend.record_recovery_probe_success(config, now).unwrap_or_default();
            settle_recovery(config, backend, &metadata, None);
            Ok(value)
        }
        Err(error) => match classify(config.skipped_errors(), config.tracked_errors(), &error) {
            Classification::Skipped | Classification::Untracked => Err(RunError::Service(error)),
            Classification::Tracked => {
                let now = config.clock().system_time();
                let failure = Failure::from_error(&error, now);
                let metadata = backend.record_recovery_probe_failure(config, &failure).unwrap_or_default();
                settle_recovery(config, backend, &metadata, Some(&failure));
                match fallback {
                    Some(fallback) => Ok(fallback(Some(&error))),
                    None => Err(RunError::Service(error)),
                }
            }
        },
    }
}

/// Rejects the protected call with the breaker open.
pub(crate) fn run_red<T, E, FB>(config: &Config, fallback: Option<FB>) -> Result<T, RunError<E>>
where
    FB: FnOnce(Option<&E>) -> T,
{
    match fallback {
        Some(fallback) => Ok(fallback(None)),
        None => Err(RunError::Open {
            name: config.name().to_owned(),
        }),
    }
}

/// Asks traffic recovery where the probe outcome leaves the breaker and
/// commits the verdict when it leaves the probing phase.
fn settle_recovery(config: &Config, backend: &FailSafe, metadata: &crate::Metadata, failure: Option<&Failure>) {
    let next = config.traffic_recovery().determine_color(config, metadata);
    if next != Color::Yellow && backend.transition_to_color(config, next).unwrap_or_default() {
        notify_all(config, Color::Yellow, next, failure);
    }
}
