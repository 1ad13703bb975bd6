//! Error taxonomy for the context engine and its storage backends.
//!
//! Only two kinds of failure ever leave the core as values:
//!
//! - [`StoreError`] is what a [`VectorStore`](crate::store::VectorStore)
//!   backend reports. The archivist wraps every one of them in
//!   [`Error::StoreUnavailable`] so callers can tell "no history" apart from
//!   "history store unreachable".
//! - Validation failures on the write path ([`Error::DimensionMismatch`],
//!   [`Error::InvalidRecord`]).
//!
//! Degraded extraction and degraded decisions are not errors: the former is
//! logged and the modality is dropped, the latter is folded into a tagged
//! [`Verdict`](crate::verdict::Verdict).

use std::time::Duration;

/// Failure reported by a vector store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached (connection refused, I/O error,
    /// server-side failure).
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the configured deadline.
    #[error("vector store timed out after {0:?}")]
    Timeout(Duration),

    /// A collection with this name already exists. Returned by
    /// `create_collection` when another creator won the race.
    #[error("collection '{0}' already exists")]
    AlreadyExists(String),

    /// The backend refused the request (4xx-class response).
    #[error("vector store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The backend answered with something that could not be decoded.
    #[error("malformed vector store response: {0}")]
    Malformed(String),
}

/// Errors surfaced by the archivist and the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying store failed. Structural: the pipeline aborts rather
    /// than return a misleadingly empty context.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// A vector did not match the target collection's declared dimension.
    #[error("vector for collection '{collection}' has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// A record violated a payload invariant (empty text, empty label,
    /// non-finite score, ...).
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl Error {
    /// True if this is the `StoreUnavailable` condition.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::StoreUnavailable(err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
