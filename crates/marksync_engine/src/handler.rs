//! Reconciliation of an incoming change batch against the local tree.
//!
//! One pass consumes the adapted changes of a pull response and mutates the
//! transaction's tree view: folders are walked breadth-first from the
//! incoming top level, entities are created, updated, moved, deduplicated
//! or deleted, favorites membership is rebuilt, and stubs left without a
//! referrer are swept. The pass is single-threaded and strictly
//! sequential: a folder's detach completes before its children reattach,
//! so the view never holds a transiently inconsistent shape.

use crate::config::ProviderConfig;
use crate::error::{SyncError, SyncResult};
use crate::metrics::ReconcileMetrics;
use chrono::{DateTime, Utc};
use marksync_protocol::{FieldCipher, IncomingChange};
use marksync_tree::{BookmarkNode, NodeId, NodeKind, TreeState};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

/// How incoming children lists combine with local state.
///
/// An explicit enum rather than a boolean so both code paths stay
/// auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// The server's children lists replace local ones. Every round after
    /// the first runs authoritative.
    Authoritative,
    /// First sync: pre-existing local entities are deduplicated against
    /// incoming ones and children merge additively.
    Additive,
}

/// Bookkeeping produced by one reconciliation pass.
#[derive(Debug, Default, Clone)]
pub struct ReconcileOutcome {
    /// Nodes whose dirty marker must survive this round so they are pushed
    /// again.
    pub retained: HashSet<NodeId>,
    /// Nodes newly deleted by the incoming batch.
    pub deleted: HashSet<NodeId>,
    /// Bookmarks whose url changed.
    pub url_changed: HashSet<NodeId>,
}

/// One incoming change with its fields decrypted.
#[derive(Debug, Clone)]
struct ResolvedChange {
    id: NodeId,
    payload: ResolvedPayload,
}

#[derive(Debug, Clone)]
enum ResolvedPayload {
    Tombstone,
    Bookmark {
        title: Option<String>,
        url: Option<String>,
    },
    Folder {
        title: Option<String>,
        children: Vec<NodeId>,
    },
}

impl ResolvedChange {
    fn is_tombstone(&self) -> bool {
        matches!(self.payload, ResolvedPayload::Tombstone)
    }

    fn is_folder(&self) -> bool {
        matches!(self.payload, ResolvedPayload::Folder { .. })
    }

    fn children(&self) -> &[NodeId] {
        match &self.payload {
            ResolvedPayload::Folder { children, .. } => children,
            _ => &[],
        }
    }
}

struct Partitions {
    top_level: Vec<NodeId>,
    orphans: Vec<NodeId>,
    favorites: Vec<(NodeId, Vec<NodeId>)>,
}

/// Runs one reconciliation pass over a transaction view.
///
/// `client_timestamp` marks the instant up to which local edits are already
/// accounted for in the server's view: a node whose dirty marker is newer
/// raced a local edit during this round and keeps its content.
///
/// Per-item decryption failures drop that item only; the rest of the batch
/// proceeds. Structural violations abort the pass.
pub fn reconcile(
    state: &mut TreeState,
    changes: &[IncomingChange],
    client_timestamp: Option<DateTime<Utc>>,
    mode: MergeMode,
    cipher: &dyn FieldCipher,
    config: &ProviderConfig,
    metrics: &dyn ReconcileMetrics,
) -> SyncResult<ReconcileOutcome> {
    let mut reconciler = Reconciler {
        state,
        config,
        metrics,
        mode,
        client_timestamp,
        received: HashMap::new(),
        order: Vec::new(),
        matched: HashSet::new(),
        deduped: HashSet::new(),
        outcome: ReconcileOutcome::default(),
    };
    reconciler.ingest(changes, cipher);
    reconciler.run()?;
    Ok(reconciler.outcome)
}

struct Reconciler<'a> {
    state: &'a mut TreeState,
    config: &'a ProviderConfig,
    metrics: &'a dyn ReconcileMetrics,
    mode: MergeMode,
    client_timestamp: Option<DateTime<Utc>>,
    received: HashMap<NodeId, ResolvedChange>,
    order: Vec<NodeId>,
    /// Incoming ids already bound to a local node by deduplication.
    matched: HashSet<NodeId>,
    /// Incoming ids whose node came out of a dedup re-key.
    deduped: HashSet<NodeId>,
    outcome: ReconcileOutcome,
}

impl Reconciler<'_> {
    /// Decrypts the batch up front; a failed item is dropped and logged.
    fn ingest(&mut self, changes: &[IncomingChange], cipher: &dyn FieldCipher) {
        for change in changes {
            let id = NodeId::new(&change.id);
            match Self::resolve(change, cipher) {
                Ok(payload) => {
                    if self.received.contains_key(&id) {
                        warn!(id = %id, "duplicate id in incoming batch, keeping the first");
                        continue;
                    }
                    self.order.push(id.clone());
                    self.received.insert(id.clone(), ResolvedChange { id, payload });
                }
                Err(error) => {
                    warn!(id = %id, %error, "dropping incoming change: decryption failed");
                    self.metrics.decryption_failure(&id);
                }
            }
        }
    }

    fn resolve(
        change: &IncomingChange,
        cipher: &dyn FieldCipher,
    ) -> Result<ResolvedPayload, marksync_protocol::CipherError> {
        if change.is_deleted {
            return Ok(ResolvedPayload::Tombstone);
        }
        let title = change
            .title
            .as_deref()
            .map(|t| cipher.decrypt(t))
            .transpose()?;
        if change.is_folder {
            Ok(ResolvedPayload::Folder {
                title,
                children: change.children.iter().map(NodeId::new).collect(),
            })
        } else {
            let url = change
                .url
                .as_deref()
                .map(|u| cipher.decrypt(u))
                .transpose()?;
            Ok(ResolvedPayload::Bookmark { title, url })
        }
    }

    fn run(&mut self) -> SyncResult<()> {
        let partitions = self.partition();
        for id in &partitions.top_level {
            self.apply_folder_tree(id)?;
        }
        for id in &partitions.orphans {
            self.process_by_id(id, None)?;
        }
        self.apply_favorites(&partitions.favorites)?;
        self.sweep_stubs()?;
        Ok(())
    }

    /// Splits the batch into top-level folders (folders no other incoming
    /// folder references as a child), orphaned records (non-folders with no
    /// incoming parent that are not favorites entries), and favorites
    /// children lists keyed by container id.
    fn partition(&self) -> Partitions {
        let mut folder_children: HashSet<NodeId> = HashSet::new();
        let mut favorites_entries: HashSet<NodeId> = HashSet::new();
        for (id, change) in &self.received {
            let target = if self.config.is_favorites_container(id) {
                &mut favorites_entries
            } else {
                &mut folder_children
            };
            for child in change.children() {
                target.insert(child.clone());
            }
        }

        let mut partitions = Partitions {
            top_level: Vec::new(),
            orphans: Vec::new(),
            favorites: Vec::new(),
        };
        for id in &self.order {
            let change = &self.received[id];
            if self.config.is_favorites_container(id) {
                partitions
                    .favorites
                    .push((id.clone(), change.children().to_vec()));
            } else if change.is_folder() {
                if !folder_children.contains(id) {
                    partitions.top_level.push(id.clone());
                }
            } else if !folder_children.contains(id) && !favorites_entries.contains(id) {
                partitions.orphans.push(id.clone());
            }
        }
        partitions
    }

    /// Walks one incoming top-level folder and everything below it,
    /// breadth-first.
    fn apply_folder_tree(&mut self, top_id: &NodeId) -> SyncResult<()> {
        self.process_by_id(top_id, None)?;

        // The top-level list is seeded even when empty: an empty incoming
        // list still replaces local children in authoritative mode.
        let mut queue: VecDeque<(NodeId, Vec<NodeId>)> = VecDeque::new();
        if let Some(change) = self.received.get(top_id) {
            if change.is_folder() {
                queue.push_back((top_id.clone(), change.children().to_vec()));
            }
        }

        while let Some((parent_id, child_ids)) = queue.pop_front() {
            // The parent may have been deleted by its own tombstone.
            if !self.state.contains(&parent_id) {
                continue;
            }
            if self.mode == MergeMode::Authoritative {
                // The server's list is authoritative: detach everything,
                // then reattach in the incoming order.
                self.state.detach_children(&parent_id);
            }
            for child_id in &child_ids {
                // Favorites containers never participate in generic folder
                // traversal, whatever the payload claims.
                if self.config.is_favorites_container(child_id) {
                    continue;
                }
                if let Some(change) = self.received.get(child_id) {
                    let enqueue = change.is_folder() && !change.children().is_empty();
                    let grandchildren = change.children().to_vec();
                    self.process_by_id(child_id, Some(&parent_id))?;
                    if enqueue && self.state.contains(child_id) {
                        queue.push_back((child_id.clone(), grandchildren));
                    }
                } else if self.state.contains(child_id) {
                    // Known locally but silent in this batch: a move.
                    self.state.move_to(child_id, &parent_id)?;
                } else {
                    self.create_stub(child_id, &parent_id)?;
                }
            }
            if self.mode == MergeMode::Additive
                && self.deduped.contains(&parent_id)
                && !self.state.children(&parent_id).is_empty()
            {
                self.outcome.retained.insert(parent_id.clone());
            }
            let final_children = self.state.children(&parent_id);
            if let Some(node) = self.state.get_mut(&parent_id) {
                node.last_acked_children = Some(final_children);
            }
        }
        Ok(())
    }

    /// Rebuilds favorites membership from the incoming container lists.
    fn apply_favorites(&mut self, favorites: &[(NodeId, Vec<NodeId>)]) -> SyncResult<()> {
        for (container_id, member_ids) in favorites {
            if !self.state.contains(container_id) {
                self.state
                    .insert(BookmarkNode::folder(container_id.clone()))?;
            }
            match self.mode {
                MergeMode::Authoritative => self.state.favorites_clear(container_id),
                MergeMode::Additive => {
                    if !self.state.children(container_id).is_empty() {
                        self.outcome.retained.insert(container_id.clone());
                    }
                }
            }
            for member_id in member_ids {
                // A favorites entry with a record of its own lands here and
                // nowhere else (the orphan partition excludes it), so apply
                // its content first.
                if let Some(change) = self.received.get(member_id).cloned() {
                    self.process_entity(&change, None)?;
                    if change.is_tombstone() {
                        continue;
                    }
                }
                if !self.state.contains(member_id) {
                    self.state.insert(BookmarkNode::stub(member_id.clone()))?;
                }
                self.state.favorite_add(container_id, member_id)?;
            }
            let final_children = self.state.children(container_id);
            if let Some(node) = self.state.get_mut(container_id) {
                node.last_acked_children = Some(final_children);
            }
        }
        Ok(())
    }

    fn process_by_id(&mut self, id: &NodeId, parent: Option<&NodeId>) -> SyncResult<()> {
        let Some(change) = self.received.get(id).cloned() else {
            return Ok(());
        };
        self.process_entity(&change, parent)
    }

    /// Reconciles one incoming entity against the local tree.
    fn process_entity(&mut self, change: &ResolvedChange, parent: Option<&NodeId>) -> SyncResult<()> {
        if self.mode == MergeMode::Additive {
            if let Some(local_id) = self.find_dedup_candidate(change, parent) {
                return self.adopt_local(change, &local_id, parent);
            }
        }

        if self.state.contains(&change.id) {
            return self.apply_to_existing(change, parent);
        }

        if change.is_tombstone() {
            // Deleting something we never had is a no-op.
            return Ok(());
        }
        if change.id == self.config.root_id {
            return Err(SyncError::structure(
                "incoming batch attempted to recreate the root folder",
            ));
        }
        let kind = if change.is_folder() {
            NodeKind::Folder
        } else {
            NodeKind::Bookmark
        };
        self.state.create(change.id.clone(), kind)?;
        self.apply_fields(change, false);
        if let Some(parent_id) = parent {
            self.state.move_to(&change.id, parent_id)?;
        }
        Ok(())
    }

    /// Binds a deduplicated local node to the incoming id.
    fn adopt_local(
        &mut self,
        change: &ResolvedChange,
        local_id: &NodeId,
        parent: Option<&NodeId>,
    ) -> SyncResult<()> {
        self.state.rekey(local_id, &change.id)?;
        self.matched.insert(change.id.clone());
        self.deduped.insert(change.id.clone());
        if change.is_folder() && !self.state.children(&change.id).is_empty() {
            // The merged folder holds local children the server has never
            // seen; its dirty marker must survive so it is pushed again.
            self.outcome.retained.insert(change.id.clone());
        }
        if let Some(parent_id) = parent {
            self.state.move_to(&change.id, parent_id)?;
        }
        Ok(())
    }

    /// Applies an incoming change to a node that already exists locally.
    fn apply_to_existing(
        &mut self,
        change: &ResolvedChange,
        parent: Option<&NodeId>,
    ) -> SyncResult<()> {
        let (raced, pending_deletion) = {
            let Some(node) = self.state.get(&change.id) else {
                return Ok(());
            };
            let raced = match (self.client_timestamp, node.dirty_at) {
                (Some(accounted), Some(dirty)) => dirty > accounted,
                _ => false,
            };
            (raced, node.pending_deletion)
        };

        if raced {
            // A local edit landed during this round: keep local content,
            // but the placement is still the server's to decide.
            self.metrics.local_win(&change.id);
            self.outcome.retained.insert(change.id.clone());
            if let Some(parent_id) = parent {
                if !pending_deletion {
                    self.state.move_to(&change.id, parent_id)?;
                }
            }
            return Ok(());
        }

        if change.is_tombstone() {
            self.outcome.deleted.insert(change.id.clone());
            self.state.remove(&change.id)?;
            return Ok(());
        }

        self.apply_fields(change, true);
        if let Some(parent_id) = parent {
            self.state.move_to(&change.id, parent_id)?;
        }
        Ok(())
    }

    /// Writes the incoming content fields onto an existing or new node.
    ///
    /// `track_url` is set for updates to existing nodes, whose url changes
    /// feed the favicon-refresh output; brand-new nodes are not reported.
    fn apply_fields(&mut self, change: &ResolvedChange, track_url: bool) {
        let Some(node) = self.state.get_mut(&change.id) else {
            return;
        };
        match &change.payload {
            ResolvedPayload::Tombstone => {}
            ResolvedPayload::Bookmark { title, url } => {
                if node.is_stub {
                    node.kind = NodeKind::Bookmark;
                    node.is_stub = false;
                }
                let url_changed = track_url && node.url != *url;
                node.title = title.clone();
                node.url = url.clone();
                if url_changed {
                    self.outcome.url_changed.insert(change.id.clone());
                }
            }
            ResolvedPayload::Folder { title, .. } => {
                if node.is_stub {
                    node.kind = NodeKind::Folder;
                    node.is_stub = false;
                }
                node.title = title.clone();
            }
        }
    }

    /// First-sync matching of an incoming entity to a pre-existing local
    /// node: same parent context, equal decrypted title (plus url for
    /// bookmarks), not a stub, not pending deletion, not already bound to
    /// another incoming id. Ties break on the first hit in the tree's
    /// canonical scan order.
    fn find_dedup_candidate(
        &self,
        change: &ResolvedChange,
        parent: Option<&NodeId>,
    ) -> Option<NodeId> {
        if self.state.contains(&change.id) {
            return None;
        }
        let (want_kind, want_title, want_url) = match &change.payload {
            ResolvedPayload::Tombstone => return None,
            ResolvedPayload::Bookmark { title, url } => {
                (NodeKind::Bookmark, title, Some(url))
            }
            ResolvedPayload::Folder { title, .. } => (NodeKind::Folder, title, None),
        };
        let candidates = match parent {
            Some(parent_id) => self.state.children(parent_id),
            None => self.state.scan_order(),
        };
        candidates.into_iter().find(|candidate_id| {
            if self.state.is_well_known(candidate_id) || self.matched.contains(candidate_id) {
                return false;
            }
            let Some(node) = self.state.get(candidate_id) else {
                return false;
            };
            node.kind == want_kind
                && !node.is_stub
                && !node.pending_deletion
                && node.title == *want_title
                && want_url.is_none_or(|url| node.url == *url)
        })
    }

    fn create_stub(&mut self, id: &NodeId, parent_id: &NodeId) -> SyncResult<()> {
        self.state.insert(BookmarkNode::stub(id.clone()))?;
        self.state.move_to(id, parent_id)?;
        Ok(())
    }

    /// Removes stubs nothing references anymore.
    fn sweep_stubs(&mut self) -> SyncResult<()> {
        let dead: Vec<NodeId> = self
            .state
            .iter()
            .filter(|n| n.is_stub && n.parent.is_none() && n.favorites.is_empty())
            .map(|n| n.id.clone())
            .collect();
        for id in dead {
            self.state.remove(&id)?;
        }
        Ok(())
    }
}
