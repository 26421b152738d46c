// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Redis key namespace.
//!
//! Every key is prefixed and versioned so unrelated applications can share a
//! Redis instance, and so a future layout change can run next to this one
//! during migration.

/// Key prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "fusebox";

/// Bumped when the stored layout changes incompatibly.
const KEY_VERSION: &str = "v1";

/// Formats the keys for one prefix.
#[derive(Clone, Debug)]
pub(crate) struct Keys {
    prefix: String,
}

impl Keys {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Sorted set of failure events for one breaker; score is the event's
    /// unix time, member is `<seq>|<failure json>`.
    pub(crate) fn failures(&self, name: &str) -> String {
        format!("{}:{KEY_VERSION}:failures:{name}", self.prefix)
    }

    /// Sorted set of success events for one breaker; score is the event's
    /// unix time, member is a sequence number.
    pub(crate) fn successes(&self, name: &str) -> String {
        format!("{}:{KEY_VERSION}:successes:{name}", self.prefix)
    }

    /// Hash of one breaker's scalar counters, timestamps, and the
    /// last-transition marker.
    pub(crate) fn metadata(&self, name: &str) -> String {
        format!("{}:{KEY_VERSION}:meta:{name}", self.prefix)
    }

    /// Hash mapping breaker names to lock tokens.
    pub(crate) fn states(&self) -> String {
        format!("{}:{KEY_VERSION}:states", self.prefix)
    }

    /// Sorted set mapping breaker names to their last-used unix time.
    pub(crate) fn last_used_at(&self) -> String {
        format!("{}:{KEY_VERSION}:last_used_at", self.prefix)
    }
}
