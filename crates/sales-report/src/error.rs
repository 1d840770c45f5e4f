//! Domain errors for the consultation pipeline
//!
//! Plumbing failures (config, HTTP, I/O) travel as `anyhow::Error`; these
//! variants are the ones callers are expected to match on.

use thiserror::Error;

use crate::state::Generation;

#[derive(Debug, Error)]
pub enum ConsultError {
    /// A fact arrived without one of its required nested objects.
    /// Normalization of the whole batch is aborted.
    #[error("malformed fact #{index} ({id}): missing {missing}")]
    MalformedRecord {
        index: usize,
        id: String,
        missing: &'static str,
    },

    /// The line items of a single fact could not be fetched
    #[error("failed to fetch details for fact {record_id}: {reason}")]
    DetailFetchFailed { record_id: String, reason: String },

    /// The current user may not read facts
    #[error("{}", crate::constants::ACCESS_DENIED_MESSAGE)]
    PermissionDenied,

    /// A result arrived for a query that has since been replaced.
    /// Not a failure: the caller drops the result.
    #[error("result for query #{stale} superseded by query #{current}")]
    StaleQuerySuperseded {
        stale: Generation,
        current: Generation,
    },
}

impl ConsultError {
    pub fn is_stale(&self) -> bool {
        matches!(self, ConsultError::StaleQuerySuperseded { .. })
    }
}
