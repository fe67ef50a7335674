//! Error types for the sync protocol.

use crate::crypto::CipherError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while translating records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An outgoing field exceeded its post-encryption size cap.
    #[error("validation failed for {id}: {field} is {len} chars (limit {limit})")]
    Validation {
        /// Id of the offending record.
        id: String,
        /// Which field exceeded the cap.
        field: &'static str,
        /// Post-encryption length.
        len: usize,
        /// The cap.
        limit: usize,
    },

    /// Field encryption or decryption failed.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// The record does not fit the wire schema.
    #[error("malformed record: {message}")]
    Decode {
        /// What was wrong with the record.
        message: String,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(id: impl Into<String>, field: &'static str, len: usize, limit: usize) -> Self {
        Self::Validation {
            id: id.into(),
            field,
            len,
            limit,
        }
    }
}
