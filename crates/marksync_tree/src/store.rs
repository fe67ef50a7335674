//! Store abstraction: snapshot transactions with conflict signalling.

use crate::error::StoreResult;
use crate::tree::TreeState;

/// A transaction over the tree store.
///
/// The transaction holds a private snapshot of the committed state; all
/// reconciliation work mutates the snapshot, and nothing is visible outside
/// until the transaction commits.
#[derive(Debug)]
pub struct TreeTransaction {
    state: TreeState,
    base_version: u64,
}

impl TreeTransaction {
    /// Creates a transaction over a snapshot taken at `base_version`.
    #[must_use]
    pub fn new(state: TreeState, base_version: u64) -> Self {
        Self {
            state,
            base_version,
        }
    }

    /// The snapshot view.
    #[must_use]
    pub fn state(&self) -> &TreeState {
        &self.state
    }

    /// The mutable snapshot view.
    pub fn state_mut(&mut self) -> &mut TreeState {
        &mut self.state
    }

    /// The committed version this transaction was begun against.
    #[must_use]
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Consumes the transaction, yielding its state and base version.
    #[must_use]
    pub fn into_parts(self) -> (TreeState, u64) {
        (self.state, self.base_version)
    }
}

/// A persistent store for the bookmark tree.
///
/// Implementations provide snapshot isolation: `begin` yields a private
/// view, and `commit` either installs it atomically or reports
/// [`StoreError::Conflict`](crate::StoreError::Conflict) when a concurrent
/// local write landed in between. Conflict handling (retry against a fresh
/// view) is the caller's job.
pub trait TreeStore: Send + Sync {
    /// Begins a transaction over a snapshot of the committed state.
    fn begin(&self) -> StoreResult<TreeTransaction>;

    /// Commits a transaction, or fails with `Conflict`.
    fn commit(&self, txn: TreeTransaction) -> StoreResult<()>;
}
