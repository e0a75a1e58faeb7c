//! Error types for specimen metadata and snapshot persistence.

use thiserror::Error;

/// Errors that can occur while reading or writing specimen records.
#[derive(Error, Debug)]
pub enum FormatError {
    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serialized slide metadata did not match the expected schema
    #[error("invalid slide metadata: {message}")]
    InvalidMetadata {
        /// Description of the shape mismatch
        message: String,
    },
}

impl FormatError {
    /// Create an invalid metadata error with a message.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            message: message.into(),
        }
    }
}
