//! Error types for the license model.

use thiserror::Error;

/// License model errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Snapshot is missing required identity fields.
    #[error("invalid license snapshot: {0}")]
    InvalidSnapshot(String),

    /// Unknown plan name.
    #[error("unknown plan type: {0}")]
    UnknownPlan(String),

    /// Cache envelope timestamps are out of order.
    #[error("inconsistent cache envelope: expires at {expires_at}, validated at {last_validated}")]
    InconsistentEnvelope {
        /// When the envelope was last validated.
        last_validated: String,
        /// When the envelope expires.
        expires_at: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for license model operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
