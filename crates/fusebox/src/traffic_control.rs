// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Policies deciding when accumulated failures open a breaker.

use crate::{Config, ConfigError, Metadata};

/// How a breaker decides that traffic must stop.
///
/// The set of policies is a closed enumeration resolved at configuration time;
/// each variant validates its threshold once, in
/// [`check_compatibility`][Self::check_compatibility], not per call.
#[derive(Clone, Debug, PartialEq)]
pub enum TrafficControl {
    /// Breach when enough failures arrive in a row.
    ///
    /// With a window configured the count in the window also has to reach the
    /// threshold, so failures spread over a long quiet period do not open the
    /// breaker. The threshold must be a positive whole number.
    ConsecutiveFailures,
    /// Breach when the failure fraction of recent traffic exceeds the
    /// threshold, which must be strictly between 0 and 1.
    ErrorRate {
        /// Minimum number of recorded outcomes before the rate is meaningful.
        min_sample_size: u32,
    },
}

impl TrafficControl {
    /// Default minimum sample size for [`TrafficControl::ErrorRate`].
    pub const DEFAULT_MIN_SAMPLE_SIZE: u32 = 10;

    /// An error-rate policy with the default minimum sample size.
    #[must_use]
    pub fn error_rate() -> Self {
        Self::ErrorRate {
            min_sample_size: Self::DEFAULT_MIN_SAMPLE_SIZE,
        }
    }

    /// Validates the policy against a configuration's threshold.
    pub fn check_compatibility(&self, threshold: f64) -> Result<(), ConfigError> {
        match self {
            Self::ConsecutiveFailures => {
                if threshold < 1.0 || threshold.fract() != 0.0 || !threshold.is_finite() {
                    return Err(ConfigError::NonIntegralThreshold(threshold));
                }
            }
            Self::ErrorRate { .. } => {
                if !(threshold > 0.0 && threshold < 1.0) {
                    return Err(ConfigError::ThresholdOutOfRange(threshold));
                }
            }
        }
        Ok(())
    }

    /// Whether the recorded failure pattern breaches the threshold.
    #[must_use]
    pub fn stop_traffic(&self, config: &Config, metadata: &Metadata) -> bool {
        match self {
            Self::ConsecutiveFailures => {
                // check_compatibility guarantees an integral threshold.
                #[expect(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    reason = "threshold is validated to be a positive whole number"
                )]
                let threshold = config.threshold() as u64;
                let failures = if config.window_size().is_some() {
                    metadata.consecutive_failures.min(metadata.failures)
                } else {
                    metadata.consecutive_failures
                };
                failures >= threshold
            }
            Self::ErrorRate { min_sample_size } => {
                let total = metadata.successes + metadata.failures;
                if total < u64::from(*min_sample_size) {
                    return false;
                }
                #[expect(clippy::cast_precision_loss, reason = "counts are far below 2^52")]
                let rate = metadata.failures as f64 / total as f64;
                // A rate exactly at the threshold does not breach; the breaker
                // opens only once the threshold is exceeded.
                rate > config.threshold()
            }
        }
    }

    /// How many failure entries a backend needs to retain for this policy, if
    /// bounded.
    ///
    /// Consecutive-failures decisions never look past `threshold` entries, so
    /// backends can prune the tail; error-rate decisions count everything in
    /// the window.
    #[must_use]
    pub fn failure_entry_bound(&self, config: &Config) -> Option<usize> {
        match self {
            Self::ConsecutiveFailures => {
                #[expect(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    reason = "threshold is validated to be a positive whole number"
                )]
                let bound = config.threshold() as usize;
                Some(bound)
            }
            Self::ErrorRate { .. } => None,
        }
    }
}

impl Default for TrafficControl {
    fn default() -> Self {
        Self::ConsecutiveFailures
    }
}
