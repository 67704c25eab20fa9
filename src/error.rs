//! Error types shared by every stage of the SBN pipeline.
//!
//! Everything here is in-memory computation, so errors surface synchronously and are
//! never retried. Structural problems with the input trees and caller misuse are kept
//! apart so the CLI and the Python layer can report them differently.

use thiserror::Error;

/// Main error type for SBN operations.
#[derive(Error, Debug)]
pub enum SbnError {
    /// Malformed or non-canonical input: missing trifurcating root, repeated taxon ids,
    /// bitset length mismatch.
    #[error("structural error: {message}")]
    Structural { message: String },

    /// Calling an operation before the state it needs exists (e.g. sampling before the
    /// SBN maps were built).
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// Tree text the external parser rejected.
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results using SbnError
pub type Result<T> = std::result::Result<T, SbnError>;

impl SbnError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}
