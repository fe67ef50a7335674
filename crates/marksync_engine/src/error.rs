//! Error types for the reconciliation engine.

use marksync_protocol::ProtocolError;
use marksync_tree::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while processing a sync round.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store error (I/O, structural violation, or an unretried conflict).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol error (record translation or cipher failure that could not
    /// be confined to one item).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Commit kept conflicting after every allowed attempt.
    #[error("commit conflict persisted after {attempts} attempts")]
    CommitRetriesExhausted {
        /// The attempt budget that was exhausted.
        attempts: u32,
    },

    /// A reconciliation contract was violated.
    ///
    /// Never expected from a correct remote payload; the round aborts.
    #[error("structural violation: {message}")]
    Structure {
        /// Description of the violated contract.
        message: String,
    },
}

impl SyncError {
    /// Creates a structural violation error.
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert() {
        let err: SyncError = StoreError::Conflict.into();
        assert!(matches!(err, SyncError::Store(StoreError::Conflict)));
    }

    #[test]
    fn exhaustion_display() {
        let err = SyncError::CommitRetriesExhausted { attempts: 5 };
        assert!(err.to_string().contains('5'));
    }
}
