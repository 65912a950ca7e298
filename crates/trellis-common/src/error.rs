//! Error types for Trellis.

use thiserror::Error;

/// Result type alias using TrellisError.
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Errors that can occur in Trellis operations.
#[derive(Debug, Error)]
pub enum TrellisError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Log errors
    #[error("log is not open")]
    LogClosed,

    #[error("seq {seq} out of range (log length {length})")]
    SeqOutOfRange { seq: u64, length: u64 },

    // Decode / structural errors
    #[error("corrupt entry at seq {seq}: {reason}")]
    Corrupt { seq: u64, reason: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

impl TrellisError {
    /// Builds a `Corrupt` error for the entry at `seq`.
    pub fn corrupt(seq: u64, reason: impl Into<String>) -> Self {
        TrellisError::Corrupt {
            seq,
            reason: reason.into(),
        }
    }

    /// Builds an `InvariantViolation` error.
    pub fn invariant(reason: impl Into<String>) -> Self {
        TrellisError::InvariantViolation(reason.into())
    }
}
