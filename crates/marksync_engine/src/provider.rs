//! The sync provider: drives one sync round end-to-end.
//!
//! The provider computes the outgoing batch, cleans up previously-sent
//! items, runs the reconciliation pass, and commits — retrying the whole
//! computation against a fresh view when a concurrent local write
//! conflicts the commit. A failed round never partially applies.

use crate::adapter;
use crate::clock::{Clock, SystemClock};
use crate::config::ProviderConfig;
use crate::error::{SyncError, SyncResult};
use crate::handler::{self, MergeMode};
use crate::metrics::{NoopMetrics, ReconcileMetrics};
use chrono::{DateTime, Utc};
use marksync_protocol::{FieldCipher, IncomingChange, SyncRecord};
use marksync_tree::{NodeId, StoreError, TreeState, TreeStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives the once-per-successful-commit data-changed notification.
pub trait SyncDelegate: Send + Sync {
    /// A round committed with a new server cursor.
    fn data_changed(&self, cursor: &str);
}

/// A delegate that ignores notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl SyncDelegate for NoopDelegate {
    fn data_changed(&self, _cursor: &str) {}
}

/// The result of one committed sync round.
///
/// The `deleted` and `url_changed` listings feed the external
/// favicon-refresh subsystem.
#[derive(Debug, Clone)]
pub struct RoundReport {
    /// Bookmarks deleted by the incoming batch, in id order.
    pub deleted: Vec<NodeId>,
    /// Bookmarks whose url changed, in id order.
    pub url_changed: Vec<NodeId>,
    /// How many commit attempts the round took.
    pub attempts: u32,
    /// The server cursor persisted by this round, if one was supplied.
    pub cursor: Option<String>,
}

/// Orchestrates sync rounds for one bookmark tree.
pub struct SyncProvider<S: TreeStore> {
    store: S,
    cipher: Arc<dyn FieldCipher>,
    config: ProviderConfig,
    clock: Arc<dyn Clock>,
    delegate: Arc<dyn SyncDelegate>,
    metrics: Arc<dyn ReconcileMetrics>,
    last_completed: Mutex<Option<DateTime<Utc>>>,
}

impl<S: TreeStore> SyncProvider<S> {
    /// Creates a provider over a store with the given cipher and config.
    pub fn new(store: S, cipher: Arc<dyn FieldCipher>, config: ProviderConfig) -> Self {
        Self {
            store,
            cipher,
            config,
            clock: Arc::new(SystemClock),
            delegate: Arc::new(NoopDelegate),
            metrics: Arc::new(NoopMetrics),
            last_completed: Mutex::new(None),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the data-changed delegate.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn SyncDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ReconcileMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// When the last cursor-less round completed locally.
    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        *self.last_completed.lock()
    }

    /// Prepares the tree for its first sync: every node's dirty marker is
    /// stamped to now and every acknowledged-children snapshot is cleared,
    /// forcing a full, non-diffed first push.
    pub fn prepare_for_first_sync(&self) -> SyncResult<()> {
        let now = self.clock.now();
        self.run_round(|state| {
            for id in state.ids() {
                if let Some(node) = state.get_mut(&id) {
                    node.mark_dirty(now);
                    node.last_acked_children = None;
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Serializes every dirty node for the next outgoing batch.
    ///
    /// A per-node serialization failure excludes only that node.
    pub fn fetch_changed_objects(&self) -> SyncResult<Vec<SyncRecord>> {
        let txn = self.store.begin()?;
        let state = txn.state();
        let mut records = Vec::new();
        for id in state.scan_order() {
            let Some(node) = state.get(&id) else { continue };
            if node.dirty_at.is_none() {
                continue;
            }
            match adapter::build_record(node, self.cipher.as_ref()) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!(id = %id, %error, "excluding node from outgoing batch");
                    self.metrics.validation_failure(&id);
                }
            }
        }
        Ok(records)
    }

    /// Handles the response to a first sync: nothing was sent, and the
    /// incoming batch merges additively with deduplication.
    pub fn handle_initial_sync_response(
        &self,
        received: &[SyncRecord],
        client_timestamp: Option<DateTime<Utc>>,
        server_cursor: Option<&str>,
    ) -> SyncResult<RoundReport> {
        self.handle_sync_response(&[], received, client_timestamp, server_cursor, MergeMode::Additive)
    }

    /// Handles one sync response: cleans up the items sent in the request,
    /// reconciles the incoming batch, clears acknowledged dirty markers,
    /// and commits with conflict retry.
    ///
    /// `client_timestamp` marks the instant up to which local edits were
    /// included in the sent batch; anything dirtied later is left for the
    /// next round. On success, a supplied `server_cursor` is persisted with
    /// the same commit and the data-changed delegate fires exactly once.
    pub fn handle_sync_response(
        &self,
        sent: &[NodeId],
        received: &[SyncRecord],
        client_timestamp: Option<DateTime<Utc>>,
        server_cursor: Option<&str>,
        mode: MergeMode,
    ) -> SyncResult<RoundReport> {
        let mut changes: Vec<IncomingChange> = Vec::with_capacity(received.len());
        for record in received {
            match adapter::parse_record(record) {
                Ok(change) => changes.push(change),
                Err(error) => {
                    warn!(id = %record.id, %error, "dropping undecodable change record");
                }
            }
        }
        let received_ids: HashSet<NodeId> =
            changes.iter().map(|c| NodeId::new(&c.id)).collect();

        let (outcome, attempts) = self.run_round(|state| {
            let clearable = self.clean_up_sent(state, sent, &received_ids, client_timestamp)?;

            let outcome = handler::reconcile(
                state,
                &changes,
                client_timestamp,
                mode,
                self.cipher.as_ref(),
                &self.config,
                self.metrics.as_ref(),
            )?;

            // Acknowledge: everything cleared here was either confirmed by
            // the server or round-tripped unopposed — unless a newer local
            // edit raced in, which must survive to the next round.
            for id in clearable.iter().chain(&received_ids) {
                if outcome.retained.contains(id) {
                    continue;
                }
                if let Some(node) = state.get_mut(id) {
                    if !newer_local_edit(node.dirty_at, client_timestamp) {
                        node.clear_dirty();
                    }
                }
            }

            if let Some(cursor) = server_cursor {
                state.set_server_cursor(Some(cursor.to_owned()));
            }
            Ok(outcome)
        })?;

        if let Some(cursor) = server_cursor {
            self.delegate.data_changed(cursor);
        } else {
            *self.last_completed.lock() = Some(self.clock.now());
        }

        let mut deleted: Vec<NodeId> = outcome.deleted.into_iter().collect();
        deleted.sort();
        let mut url_changed: Vec<NodeId> = outcome.url_changed.into_iter().collect();
        url_changed.sort();
        debug!(
            attempts,
            deleted = deleted.len(),
            url_changed = url_changed.len(),
            "sync round committed"
        );
        Ok(RoundReport {
            deleted,
            url_changed,
            attempts,
            cursor: server_cursor.map(str::to_owned),
        })
    }

    /// Cleans up the nodes sent in the request this response answers.
    ///
    /// Returns the ids whose dirty markers may be cleared.
    fn clean_up_sent(
        &self,
        state: &mut TreeState,
        sent: &[NodeId],
        received_ids: &HashSet<NodeId>,
        client_timestamp: Option<DateTime<Utc>>,
    ) -> SyncResult<HashSet<NodeId>> {
        let mut clearable = HashSet::new();
        for id in sent {
            let Some(node) = state.get(id) else { continue };
            if newer_local_edit(node.dirty_at, client_timestamp) {
                // Re-dirtied while the request was in flight; resend.
                continue;
            }
            if node.pending_deletion && !received_ids.contains(id) {
                // The deletion round-tripped unopposed.
                state.remove(id)?;
                continue;
            }
            if node.is_folder() && !received_ids.contains(id) {
                let children = state.children(id);
                if let Some(node) = state.get_mut(id) {
                    node.last_acked_children = Some(children);
                }
            }
            clearable.insert(id.clone());
        }
        Ok(clearable)
    }

    /// Runs one round body against a fresh transaction view, committing at
    /// the end; a conflicting commit discards the view and re-runs the body
    /// up to the configured attempt budget.
    fn run_round<T>(
        &self,
        mut body: impl FnMut(&mut TreeState) -> SyncResult<T>,
    ) -> SyncResult<(T, u32)> {
        let budget = self.config.commit_attempts.max(1);
        for attempt in 1..=budget {
            let mut txn = self.store.begin()?;
            let value = body(txn.state_mut())?;
            match self.store.commit(txn) {
                Ok(()) => return Ok((value, attempt)),
                Err(StoreError::Conflict) if attempt < budget => {
                    debug!(attempt, "commit conflict, recomputing against a fresh view");
                }
                Err(StoreError::Conflict) => {
                    return Err(SyncError::CommitRetriesExhausted { attempts: budget });
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(SyncError::CommitRetriesExhausted { attempts: budget })
    }
}

fn newer_local_edit(
    dirty_at: Option<DateTime<Utc>>,
    client_timestamp: Option<DateTime<Utc>>,
) -> bool {
    match (dirty_at, client_timestamp) {
        (Some(dirty), Some(accounted)) => dirty > accounted,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use marksync_protocol::{AesGcmFieldCipher, FieldKey, FIELD_KEY_SIZE};
    use marksync_tree::MemoryTreeStore;

    fn cipher() -> Arc<AesGcmFieldCipher> {
        Arc::new(AesGcmFieldCipher::new(
            FieldKey::from_bytes(&[5u8; FIELD_KEY_SIZE]).unwrap(),
        ))
    }

    fn provider() -> SyncProvider<MemoryTreeStore> {
        let store = MemoryTreeStore::new(NodeId::new("root"), &[NodeId::new("fav")]);
        let config = ProviderConfig::new("root").with_favorites(vec![NodeId::new("fav")]);
        SyncProvider::new(store, cipher(), config)
    }

    #[test]
    fn prepare_for_first_sync_dirties_everything() {
        let p = provider();
        p.store().mutate(|state| {
            state
                .insert_bookmark(NodeId::new("B1"), Some("x"), None)
                .unwrap();
            let root = state.get_mut(&NodeId::new("root")).unwrap();
            root.last_acked_children = Some(vec![]);
        });

        p.prepare_for_first_sync().unwrap();

        let snapshot = p.store().snapshot();
        for node in snapshot.iter() {
            assert!(node.dirty_at.is_some(), "{} not dirty", node.id);
            assert!(node.last_acked_children.is_none());
        }
    }

    #[test]
    fn fetch_changed_objects_skips_clean_and_invalid_nodes() {
        let p = provider();
        let now = Utc::now();
        p.store().mutate(|state| {
            state
                .insert_bookmark(NodeId::new("clean"), Some("x"), None)
                .unwrap();
            state
                .insert_bookmark(NodeId::new("dirty"), Some("y"), Some("https://y.com"))
                .unwrap();
            state.get_mut(&NodeId::new("dirty")).unwrap().mark_dirty(now);
            state
                .insert_bookmark(NodeId::new("oversized"), None, Some(&"z".repeat(4000)))
                .unwrap();
            state
                .get_mut(&NodeId::new("oversized"))
                .unwrap()
                .mark_dirty(now);
        });

        let records = p.fetch_changed_objects().unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["dirty"]);
    }

    #[test]
    fn sent_pending_deletion_is_removed_when_unopposed() {
        let p = provider();
        let now = Utc::now();
        p.store().mutate(|state| {
            state
                .insert_bookmark(NodeId::new("B1"), Some("x"), None)
                .unwrap();
            let node = state.get_mut(&NodeId::new("B1")).unwrap();
            node.pending_deletion = true;
            node.mark_dirty(now);
        });

        p.handle_sync_response(
            &[NodeId::new("B1")],
            &[],
            Some(now),
            None,
            MergeMode::Authoritative,
        )
        .unwrap();

        assert!(!p.store().snapshot().contains(&NodeId::new("B1")));
    }

    #[test]
    fn sent_folder_refreshes_acked_children_and_clears_dirty() {
        let p = provider();
        let now = Utc::now();
        p.store().mutate(|state| {
            state.insert_folder(NodeId::new("F1")).unwrap();
            state
                .insert_bookmark(NodeId::new("B1"), Some("x"), None)
                .unwrap();
            state.move_to(&NodeId::new("F1"), &NodeId::new("root")).unwrap();
            state.move_to(&NodeId::new("B1"), &NodeId::new("F1")).unwrap();
            state.get_mut(&NodeId::new("F1")).unwrap().mark_dirty(now);
        });

        p.handle_sync_response(
            &[NodeId::new("F1")],
            &[],
            Some(now),
            None,
            MergeMode::Authoritative,
        )
        .unwrap();

        let snapshot = p.store().snapshot();
        let f1 = snapshot.get(&NodeId::new("F1")).unwrap();
        assert!(f1.dirty_at.is_none());
        assert_eq!(f1.last_acked_children, Some(vec![NodeId::new("B1")]));
    }

    #[test]
    fn sent_node_redirtied_in_flight_is_left_for_resend() {
        let p = provider();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(5);
        p.store().mutate(|state| {
            state
                .insert_bookmark(NodeId::new("B1"), Some("x"), None)
                .unwrap();
            state.get_mut(&NodeId::new("B1")).unwrap().mark_dirty(t2);
        });

        p.handle_sync_response(
            &[NodeId::new("B1")],
            &[],
            Some(t1),
            None,
            MergeMode::Authoritative,
        )
        .unwrap();

        let snapshot = p.store().snapshot();
        assert_eq!(snapshot.get(&NodeId::new("B1")).unwrap().dirty_at, Some(t2));
    }

    #[test]
    fn conflict_budget_exhaustion_surfaces() {
        let p = provider();
        p.store().inject_conflicts(5);

        let err = p
            .handle_sync_response(&[], &[], None, None, MergeMode::Authoritative)
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::CommitRetriesExhausted { attempts: 5 }
        ));
    }

    #[test]
    fn local_completion_time_recorded_without_cursor() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryTreeStore::new(NodeId::new("root"), &[]);
        let p = SyncProvider::new(store, cipher(), ProviderConfig::new("root"))
            .with_clock(clock.clone());

        assert!(p.last_completed().is_none());
        p.handle_sync_response(&[], &[], None, None, MergeMode::Authoritative)
            .unwrap();
        assert_eq!(p.last_completed(), Some(start));
    }
}
