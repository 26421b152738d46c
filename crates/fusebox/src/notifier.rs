// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transition reporting.
//!
//! Notifiers observe color transitions. Because transitions can be attempted
//! by many concurrent callers across processes, only the caller that won the
//! backend's deduplicated transition invokes them, so each logical transition
//! is reported exactly once. A misbehaving notifier is isolated: its error is
//! routed to the configured error notifier and never reaches the protected
//! call path.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::{Color, Config, Failure, NotifierError};

/// Receives breaker color transitions.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Reports one transition.
    ///
    /// `failure` is the error that caused the transition, when one did (a
    /// breach or a failed probe); time-based and recovery transitions carry
    /// `None`. Fire-and-forget from the breaker's perspective.
    fn notify(
        &self,
        config: &Config,
        from_color: Color,
        to_color: Color,
        failure: Option<&Failure>,
    ) -> Result<(), NotifierError>;
}

/// A notifier that emits structured `tracing` events.
///
/// Transitions toward red are warnings; everything else is informational.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        config: &Config,
        from_color: Color,
        to_color: Color,
        failure: Option<&Failure>,
    ) -> Result<(), NotifierError> {
        let error = failure.map(ToString::to_string);
        if to_color == Color::Red {
            tracing::warn!(
                breaker = config.name(),
                from = %from_color,
                to = %to_color,
                error = error.as_deref(),
                "circuit breaker opened"
            );
        } else {
            tracing::info!(
                breaker = config.name(),
                from = %from_color,
                to = %to_color,
                error = error.as_deref(),
                "circuit breaker changed color"
            );
        }
        Ok(())
    }
}

/// The escape hatch for backend and notifier failures.
///
/// Invoked by the fail-safe machinery whenever infrastructure around the
/// breaker misbehaves; it must never panic.
pub type ErrorNotifier = Arc<dyn Fn(&(dyn Error + Send + Sync)) + Send + Sync>;

/// The default error notifier: a `tracing` warning.
#[must_use]
pub fn default_error_notifier() -> ErrorNotifier {
    Arc::new(|error| {
        tracing::warn!(error = %error, "circuit breaker infrastructure error");
    })
}

/// Invokes every configured notifier, isolating individual failures.
pub(crate) fn notify_all(config: &Config, from_color: Color, to_color: Color, failure: Option<&Failure>) {
    for notifier in config.notifiers() {
        if let Err(error) = notifier.notify(config, from_color, to_color, failure) {
            (config.error_notifier())(&error);
        }
    }
}
