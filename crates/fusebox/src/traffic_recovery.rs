// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Policies deciding how a probing breaker closes again.

use crate::{Color, Config, Metadata};

/// How a breaker in its probing phase decides the next color.
///
/// Evaluated after every recorded probe outcome. Returning [`Color::Yellow`]
/// keeps the breaker probing; any other color is committed through the
/// backend's deduplicated transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrafficRecovery {
    /// Close as soon as one probe succeeds; a probe failure re-opens.
    SingleSuccess,
    /// Close once `recovery_threshold` probes have succeeded since recovery
    /// began, with zero tolerance: any probe failure re-opens immediately,
    /// which also makes the successes necessarily consecutive.
    ConsecutiveSuccesses,
}

impl TrafficRecovery {
    /// The color the breaker should move to given current probe results.
    #[must_use]
    pub fn determine_color(&self, config: &Config, metadata: &Metadata) -> Color {
        match self {
            Self::SingleSuccess => {
                if metadata.recovery_probe_successes >= 1 {
                    Color::Green
                } else {
                    Color::Red
                }
            }
            Self::ConsecutiveSuccesses => {
                if metadata.recovery_probe_failures > 0 {
                    Color::Red
                } else if metadata.recovery_probe_successes >= config.recovery_threshold() {
                    Color::Green
                } else {
                    Color::Yellow
                }
            }
        }
    }
}

impl Default for TrafficRecovery {
    fn default() -> Self {
        Self::ConsecutiveSuccesses
    }
}
