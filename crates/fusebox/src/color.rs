// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The breaker state machine's observable states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The derived state of a circuit breaker.
///
/// Colors are never stored; they are recomputed from [`Metadata`][crate::Metadata]
/// on every read so that independent processes sharing a backend always agree.
///
/// ```text
/// ┌───────┐   traffic control breaches    ┌───────┐
/// │ Green │ ─────────────────────────────▶│  Red  │
/// └───────┘                               └───────┘
///     ▲                                       │
///     │ recovery          ┌────────┐          │ cool-off
///     └────────────────── │ Yellow │ ◀────────┘ elapsed
///       satisfied         └────────┘
///            (a probe failure returns the breaker to Red)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// Closed: calls pass through.
    Green,
    /// Half-open: a limited recovery probe is allowed.
    Yellow,
    /// Open: calls are blocked.
    Red,
}

impl Color {
    /// The lowercase token used on the wire and in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned when parsing an unrecognized color token.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized color `{0}`")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(Self::Green),
            "yellow" => Ok(Self::Yellow),
            "red" => Ok(Self::Red),
            other => Err(ParseColorError(other.to_owned())),
        }
    }
}
