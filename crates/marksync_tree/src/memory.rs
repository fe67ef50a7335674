//! In-memory tree store for testing and ephemeral trees.

use crate::error::{StoreError, StoreResult};
use crate::node::NodeId;
use crate::store::{TreeStore, TreeTransaction};
use crate::tree::TreeState;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
struct Committed {
    state: TreeState,
    version: u64,
}

/// An in-memory tree store with versioned snapshot commits.
///
/// Suitable for unit and integration tests and for ephemeral trees. A
/// commit succeeds only if no other commit landed since the transaction
/// began; otherwise it reports [`StoreError::Conflict`].
///
/// For retry tests, [`inject_conflicts`](Self::inject_conflicts) scripts
/// the next *n* commits to fail with a conflict regardless of versions.
#[derive(Debug)]
pub struct MemoryTreeStore {
    inner: RwLock<Committed>,
    forced_conflicts: AtomicU32,
}

impl MemoryTreeStore {
    /// Creates a store around a fresh tree.
    #[must_use]
    pub fn new(root: NodeId, favorites_containers: &[NodeId]) -> Self {
        Self::with_state(TreeState::new(root, favorites_containers))
    }

    /// Creates a store around pre-existing state.
    #[must_use]
    pub fn with_state(state: TreeState) -> Self {
        Self {
            inner: RwLock::new(Committed { state, version: 0 }),
            forced_conflicts: AtomicU32::new(0),
        }
    }

    /// A copy of the committed state.
    #[must_use]
    pub fn snapshot(&self) -> TreeState {
        self.inner.read().state.clone()
    }

    /// The committed version counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Scripts the next `n` commits to fail with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Applies a mutation directly to the committed state, bumping the
    /// version.
    ///
    /// This models a concurrent local write (e.g. the user edits a bookmark
    /// while a sync round is in flight) and will conflict any transaction
    /// already begun.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut TreeState) -> T) -> T {
        let mut inner = self.inner.write();
        let result = f(&mut inner.state);
        inner.version += 1;
        result
    }
}

impl TreeStore for MemoryTreeStore {
    fn begin(&self) -> StoreResult<TreeTransaction> {
        let inner = self.inner.read();
        Ok(TreeTransaction::new(inner.state.clone(), inner.version))
    }

    fn commit(&self, txn: TreeTransaction) -> StoreResult<()> {
        if self.take_forced_conflict() {
            return Err(StoreError::Conflict);
        }
        let (state, base_version) = txn.into_parts();
        let mut inner = self.inner.write();
        if inner.version != base_version {
            return Err(StoreError::Conflict);
        }
        inner.state = state;
        inner.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryTreeStore {
        MemoryTreeStore::new(NodeId::new("root"), &[])
    }

    #[test]
    fn commit_installs_changes() {
        let store = store();
        let mut txn = store.begin().unwrap();
        txn.state_mut()
            .insert_bookmark(NodeId::new("B1"), Some("x"), None)
            .unwrap();
        store.commit(txn).unwrap();

        assert!(store.snapshot().contains(&NodeId::new("B1")));
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn concurrent_write_conflicts() {
        let store = store();
        let mut txn = store.begin().unwrap();
        txn.state_mut()
            .insert_bookmark(NodeId::new("B1"), None, None)
            .unwrap();

        // A local write lands while the transaction is open.
        store.mutate(|state| {
            state
                .insert_bookmark(NodeId::new("B2"), None, None)
                .unwrap();
        });

        let err = store.commit(txn).unwrap_err();
        assert!(err.is_conflict());
        // The transaction's writes were discarded.
        assert!(!store.snapshot().contains(&NodeId::new("B1")));
        assert!(store.snapshot().contains(&NodeId::new("B2")));
    }

    #[test]
    fn injected_conflicts_fail_then_clear() {
        let store = store();
        store.inject_conflicts(2);

        for _ in 0..2 {
            let txn = store.begin().unwrap();
            assert!(store.commit(txn).unwrap_err().is_conflict());
        }
        let txn = store.begin().unwrap();
        store.commit(txn).unwrap();
    }

    #[test]
    fn begin_sees_committed_snapshot() {
        let store = store();
        store.mutate(|state| {
            state
                .insert_bookmark(NodeId::new("B1"), None, None)
                .unwrap();
        });

        let txn = store.begin().unwrap();
        assert!(txn.state().contains(&NodeId::new("B1")));
    }
}
