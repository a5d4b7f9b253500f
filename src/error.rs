//! Unified error handling for the hike tracker.
//!
//! Errors only surface from lifecycle commands and checkpoint storage.
//! Sample ingestion, scoring and feed updates never fail: out-of-range input
//! is clamped and sensor gaps are represented as absence.

use thiserror::Error;

/// Unified error type for hike tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A lifecycle command was issued in a phase that does not allow it
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    /// Checkpoint document failed validation
    #[error("invalid checkpoint: {message}")]
    Checkpoint { message: String },
    /// Filesystem error while reading or writing a checkpoint
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// SQLite error from the persistent checkpoint store
    #[cfg(feature = "persistence")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// MessagePack encoding error
    #[cfg(feature = "persistence")]
    #[error("checkpoint encoding failed: {0}")]
    Encoding(#[from] rmp_serde::encode::Error),
    /// MessagePack decoding error
    #[cfg(feature = "persistence")]
    #[error("checkpoint decoding failed: {0}")]
    Decoding(#[from] rmp_serde::decode::Error),
}

impl TrackerError {
    pub(crate) fn checkpoint(message: impl Into<String>) -> Self {
        TrackerError::Checkpoint {
            message: message.into(),
        }
    }
}

/// Result type alias for hike tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
