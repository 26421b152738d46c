// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error taxonomy.
//!
//! The breaker keeps three failure domains strictly apart:
//!
//! - [`RunError`] is what the caller sees: either the protected call's own
//!   error, re-raised, or a rejection because the breaker is open.
//! - [`ConfigError`] and [`LockError`] are caller mistakes reported eagerly.
//! - [`BackendError`] and [`NotifierError`] describe infrastructure trouble.
//!   They never reach the protected call path; the fail-safe wrapper converts
//!   them into safe defaults and reports them through the configured error
//!   notifier.

use std::error::Error;
use std::fmt;

use crate::Color;

/// The error returned by [`CircuitBreaker::run`][crate::CircuitBreaker::run].
#[derive(Debug)]
pub enum RunError<E> {
    /// The breaker is red and no fallback was supplied; the protected call
    /// never ran.
    Open {
        /// Name of the breaker that rejected the call.
        name: String,
    },
    /// The protected call ran and failed; its error is re-raised unchanged.
    Service(E),
}

impl<E> RunError<E> {
    /// Returns the protected call's error, if any.
    pub fn into_service(self) -> Option<E> {
        match self {
            Self::Open { .. } => None,
            Self::Service(error) => Some(error),
        }
    }

    /// Whether the call was rejected without running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RunError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { name } => write!(f, "circuit breaker `{name}` is open"),
            Self::Service(error) => error.fmt(f),
        }
    }
}

impl<E: Error + 'static> Error for RunError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Service(error) => Some(error),
        }
    }
}

/// The error returned by [`CircuitBreaker::lock`][crate::CircuitBreaker::lock].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Breakers can only be locked open or closed.
    #[error("circuit breakers cannot be locked to color `{0}`")]
    InvalidColor(Color),
}

/// A configuration rejected at build time.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The consecutive-failures policy counts whole failures.
    #[error("the consecutive-failures policy requires a positive whole-number threshold, got {0}")]
    NonIntegralThreshold(f64),
    /// The error-rate policy interprets the threshold as a fraction.
    #[error("the error-rate policy requires a threshold strictly between 0 and 1, got {0}")]
    ThresholdOutOfRange(f64),
    /// Recovery needs at least one successful probe.
    #[error("recovery threshold must be at least 1")]
    ZeroRecoveryThreshold,
}

/// A failure inside a state backend.
///
/// Opaque by design; use [`Error::source`] to reach the underlying cause.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl BackendError {
    /// Creates an error wrapping an underlying cause.
    pub fn new(message: impl Into<String>, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an error from a bare message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// A failure inside a notifier.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct NotifierError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl NotifierError {
    /// Creates an error wrapping an underlying cause.
    pub fn new(message: impl Into<String>, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an error from a bare message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn open_error_carries_the_breaker_name() {
        let error: RunError<Boom> = RunError::Open {
            name: "payments".to_owned(),
        };
        assert_eq!(error.to_string(), "circuit breaker `payments` is open");
        assert!(error.is_open());
        assert!(error.into_service().is_none());
    }

    #[test]
    fn service_error_is_reraised_unchanged() {
        let error = RunError::Service(Boom);
        assert_eq!(error.to_string(), "boom");
        assert!(!error.is_open());
        assert!(error.into_service().is_some());
    }

    #[test]
    fn backend_error_exposes_its_cause() {
        let error = BackendError::new("store unavailable", Boom);
        assert_eq!(error.to_string(), "store unavailable");
        assert_eq!(error.source().unwrap().to_string(), "boom");
    }

    #[test]
    fn lock_error_names_the_rejected_color() {
        let error = LockError::InvalidColor(Color::Yellow);
        assert_eq!(error.to_string(), "circuit breakers cannot be locked to color `yellow`");
    }
}
