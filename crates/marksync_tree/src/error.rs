//! Error types for tree store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during tree store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The committed state moved underneath the transaction.
    #[error("commit conflict: store changed underneath the transaction")]
    Conflict,

    /// An I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A tree-shape invariant was violated.
    #[error("structural violation: {message}")]
    Structure {
        /// Description of the violated invariant.
        message: String,
    },
}

impl StoreError {
    /// Creates a structural violation error.
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }

    /// Returns true if this error is a commit conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_detection() {
        assert!(StoreError::Conflict.is_conflict());
        assert!(!StoreError::structure("cycle").is_conflict());
    }

    #[test]
    fn error_display() {
        let err = StoreError::structure("node F1 would become its own ancestor");
        assert!(err.to_string().contains("F1"));
    }
}
