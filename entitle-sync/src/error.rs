//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error (authority unreachable).
    #[error("network error: {0}")]
    Network(String),

    /// The authority answered with something we cannot read.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The authority rejected the license.
    #[error("license rejected: {0}")]
    Rejected(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Authentication error from the ambient auth subsystem.
    #[error("authentication error: {0}")]
    Auth(String),

    /// No license is resident.
    #[error("no license is active")]
    NotLicensed,

    /// The license was cleared while the call was in flight.
    #[error("result discarded: license was cleared")]
    Superseded,

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Invalid license data.
    #[error(transparent)]
    License(#[from] entitle_license::LicenseError),
}

impl SyncError {
    /// True for failures that say nothing about the license itself.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Protocol(_) | Self::Timeout)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
