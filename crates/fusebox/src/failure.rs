// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The immutable record of one tracked error occurrence.

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::BackendError;
use crate::clock::{from_unix_seconds, unix_seconds};

/// Version tag embedded in the serialized form so stored entries can be
/// migrated if the wire format ever changes.
const WIRE_VERSION: u32 = 1;

/// One error caught by a breaker.
///
/// Failures are immutable once created. Two failures are equal iff their
/// class, message, and second-truncated time all match, which is what lets
/// backends deduplicate and replay them safely.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Failure {
    error_class: String,
    error_message: String,
    time: u64,
}

impl Failure {
    /// Captures an error at the given time, truncated to whole seconds.
    ///
    /// The class is the error's Rust type name and the message its `Display`
    /// rendering.
    pub fn from_error<E: Error>(error: &E, at: SystemTime) -> Self {
        Self::new(std::any::type_name::<E>(), error.to_string(), at)
    }

    /// Creates a failure from its parts, truncating the time to whole seconds.
    pub fn new(error_class: impl Into<String>, error_message: impl Into<String>, at: SystemTime) -> Self {
        Self {
            error_class: error_class.into(),
            error_message: error_message.into(),
            time: unix_seconds(at),
        }
    }

    /// The error's class name.
    #[must_use]
    pub fn error_class(&self) -> &str {
        &self.error_class
    }

    /// The error's message.
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// When the error occurred, truncated to whole seconds.
    #[must_use]
    pub fn time(&self) -> SystemTime {
        from_unix_seconds(self.time)
    }

    /// When the error occurred, as whole seconds since the Unix epoch.
    #[must_use]
    pub fn time_unix(&self) -> u64 {
        self.time
    }

    /// Serializes the failure to its JSON wire form.
    pub fn to_json(&self) -> Result<String, BackendError> {
        let wire = WireFailure {
            v: WIRE_VERSION,
            error_class: Cow::Borrowed(&self.error_class),
            error_message: Cow::Borrowed(&self.error_message),
            time: self.time,
        };
        serde_json::to_string(&wire).map_err(|e| BackendError::new("failed to serialize failure", e))
    }

    /// Deserializes a failure from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, BackendError> {
        let wire: WireFailure<'_> =
            serde_json::from_str(json).map_err(|e| BackendError::new("failed to deserialize failure", e))?;
        Ok(Self {
            error_class: wire.error_class.into_owned(),
            error_message: wire.error_message.into_owned(),
            time: wire.time,
        })
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_class, self.error_message)
    }
}

#[derive(Serialize, Deserialize)]
struct WireFailure<'a> {
    v: u32,
    error_class: Cow<'a, str>,
    error_message: Cow<'a, str>,
    time: u64,
}
