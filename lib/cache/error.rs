//! Errors shared by the caches.

use std::fmt::{self, Debug};

use thiserror::Error;

use crate::cache::traits::BoxError;

/// A supplier failed to produce a resource. Nothing was cached, so the call may be retried.
#[derive(Debug, Error)]
#[error("failed to create resource for key {key}: {source}")]
pub struct CreationError {
    key: String,
    #[source]
    source: BoxError,
}

impl CreationError {
    pub(crate) fn new<K: Debug + ?Sized>(key: &K, source: BoxError) -> Self {
        Self {
            key: format!("{key:?}"),
            source,
        }
    }

    /// The `Debug` rendering of the key whose creation failed.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// One or more close operations failed.
#[derive(Debug, Error)]
pub enum CloseError {
    /// Closing a single resource failed. The cache entry was still removed.
    #[error("failed to close resource for key {key}: {source}")]
    Resource {
        /// The `Debug` rendering of the key.
        key: String,
        /// What the resource reported.
        #[source]
        source: BoxError,
    },

    /// Several closes were attempted; every failure is listed.
    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<CloseError>),
}

impl CloseError {
    pub(crate) fn resource<K: Debug + ?Sized>(key: &K, source: impl Into<BoxError>) -> Self {
        Self::Resource {
            key: format!("{key:?}"),
            source: source.into(),
        }
    }

    /// Fold a batch of failures into a single result. An empty batch is success.
    pub fn collect(failures: Vec<CloseError>) -> Result<(), CloseError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::Aggregate(failures))
        }
    }

    /// The individual failures behind this error, in the order they happened.
    #[must_use]
    pub fn causes(&self) -> &[CloseError] {
        match self {
            Self::Aggregate(causes) => causes,
            Self::Resource { .. } => std::slice::from_ref(self),
        }
    }
}

struct AggregateDisplay<'a>(&'a [CloseError]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to close all opened resources; the following failures occurred:")?;
        for (i, cause) in self.0.iter().enumerate() {
            write!(f, "\n  failure {i}: {cause}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_success() {
        assert!(CloseError::collect(Vec::new()).is_ok());
    }

    #[test]
    fn aggregate_lists_every_cause() {
        let err = CloseError::collect(vec![
            CloseError::resource("a.jar", "disk on fire"),
            CloseError::resource("b.jar", "already gone"),
        ])
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("failure 0: failed to close resource for key \"a.jar\": disk on fire"));
        assert!(msg.contains("failure 1: failed to close resource for key \"b.jar\": already gone"));
        assert_eq!(err.causes().len(), 2);
    }
}
