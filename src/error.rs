//! Failures that abort a whole feed collection.
//!
//! Per-record problems are [`crate::record::RecordError`] and never surface
//! here.

use thiserror::Error;

use crate::parser::FeedFormatError;

#[derive(Debug, Error)]
pub enum CollectError {
    /// Connect, timeout, body read, or non-success HTTP status.
    #[error("{0}")]
    UpstreamUnavailable(#[from] reqwest::Error),

    /// The body is not a JSON array of objects.
    #[error("malformed feed: {0}")]
    UpstreamMalformed(#[from] FeedFormatError),
}

impl From<serde_json::Error> for CollectError {
    fn from(err: serde_json::Error) -> Self {
        Self::UpstreamMalformed(FeedFormatError::InvalidElement(err))
    }
}
