// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ordered error predicates deciding which errors a breaker tracks.
//!
//! A configuration carries two ordered lists of classifiers: skipped errors,
//! evaluated first, and tracked errors. An error matching the skip list is
//! re-raised untouched and never affects breaker state; an error matching the
//! track list is recorded and may open the breaker; anything else is re-raised
//! untouched as well.
//!
//! Fatal conditions have no entry here on purpose: panics and aborts are never
//! caught by the breaker, so they cannot be misclassified as service failures.

use std::any::type_name;
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A single typed predicate over protected-call errors.
#[derive(Clone)]
pub struct ErrorClassifier {
    label: Cow<'static, str>,
    matcher: Matcher,
}

#[derive(Clone)]
enum Matcher {
    Any,
    Predicate(Arc<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>),
}

impl ErrorClassifier {
    /// Matches every error.
    #[must_use]
    pub fn any() -> Self {
        Self {
            label: Cow::Borrowed("any"),
            matcher: Matcher::Any,
        }
    }

    /// Matches errors of the concrete type `E`.
    #[must_use]
    pub fn of<E: Error + 'static>() -> Self {
        Self {
            label: Cow::Borrowed(type_name::<E>()),
            matcher: Matcher::Predicate(Arc::new(|error| error.is::<E>())),
        }
    }

    /// Matches errors satisfying an arbitrary predicate.
    ///
    /// The label is used in `Debug` output only.
    pub fn matching(
        label: impl Into<Cow<'static, str>>,
        predicate: impl Fn(&(dyn Error + 'static)) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            matcher: Matcher::Predicate(Arc::new(predicate)),
        }
    }

    /// Evaluates the classifier against an error.
    #[must_use]
    pub fn matches(&self, error: &(dyn Error + 'static)) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Predicate(predicate) => predicate(error),
        }
    }

    /// The classifier's display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorClassifier").field(&self.label).finish()
    }
}

/// How an error relates to a configuration's classifier lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Classification {
    /// Matched the skip list: re-raise, touch nothing.
    Skipped,
    /// Matched the track list: record and evaluate traffic control.
    Tracked,
    /// Matched neither list: re-raise, touch nothing.
    Untracked,
}

/// Classifies an error, giving the skip list precedence over the track list.
pub(crate) fn classify(
    skipped: &[ErrorClassifier],
    tracked: &[ErrorClassifier],
    error: &(dyn Error + 'static),
) -> Classification {
    if skipped.iter().any(|classifier| classifier.matches(error)) {
        Classification::Skipped
    } else if tracked.iter().any(|classifier| classifier.matches(error)) {
        Classification::Tracked
    } else {
        Classification::Untracked
    }
}
