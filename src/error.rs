use thiserror::Error;

use crate::store::StorageError;

// ---------------------------------------------------------------------------
// Engine error taxonomy
// ---------------------------------------------------------------------------

/// Rejected request parameters. Raised before any storage access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("limit must be between 1 and {max}, got {value}")]
    LimitOutOfRange { value: i64, max: u64 },

    #[error("offset must be non-negative, got {0}")]
    NegativeOffset(i64),
}

/// Everything an endpoint can fail with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("csv encoding failed: {0}")]
    Encode(#[from] csv::Error),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// The representative row does not carry the expected metadata column,
    /// or (in verification mode) a later row disagrees with it.
    #[error("dataset shape error: metadata field '{field}' {reason}")]
    DataShape { field: String, reason: &'static str },
}

impl Error {
    pub(crate) fn missing_metadata(field: &str) -> Self {
        Error::DataShape {
            field: field.to_string(),
            reason: "is absent from the result set",
        }
    }

    pub(crate) fn divergent_metadata(field: &str) -> Self {
        Error::DataShape {
            field: field.to_string(),
            reason: "differs from the representative row",
        }
    }

    /// Whether the failure is the caller's fault (4xx) rather than ours (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
