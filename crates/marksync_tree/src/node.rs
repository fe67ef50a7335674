//! Bookmark node model.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a bookmark-tree node.
///
/// Ids are opaque strings assigned by whichever side created the node first.
/// The sync service treats them as globally unique within one tree.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a new random node id (UUID v4).
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The kind of a bookmark-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A leaf bookmark pointing at a URL.
    Bookmark,
    /// A folder holding an ordered list of children.
    Folder,
}

/// A node in the local bookmark tree.
///
/// Nodes are created on first reference (an explicit change record, or a
/// speculative stub), mutated in place on each reconciliation pass, and
/// removed once a pending deletion round-trips or an unreferenced stub is
/// swept.
#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkNode {
    /// Globally unique id.
    pub id: NodeId,
    /// Bookmark or folder.
    pub kind: NodeKind,
    /// Display title, if any.
    pub title: Option<String>,
    /// Target URL (bookmarks only).
    pub url: Option<String>,
    /// Ordered child ids (folders only).
    pub children: Vec<NodeId>,
    /// Back-reference to the containing folder, if attached.
    pub parent: Option<NodeId>,
    /// Dirty marker: when the node was last locally modified and not yet
    /// acknowledged by the server.
    pub dirty_at: Option<DateTime<Utc>>,
    /// Locally deleted, awaiting a round-trip through sync.
    pub pending_deletion: bool,
    /// Created only because it was referenced before its defining record
    /// arrived. Stubs carry no title or url.
    pub is_stub: bool,
    /// Favorites-container ids this node is a member of.
    pub favorites: BTreeSet<NodeId>,
    /// Child order last successfully synced, used to diff outgoing lists.
    pub last_acked_children: Option<Vec<NodeId>>,
}

impl BookmarkNode {
    fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            title: None,
            url: None,
            children: Vec::new(),
            parent: None,
            dirty_at: None,
            pending_deletion: false,
            is_stub: false,
            favorites: BTreeSet::new(),
            last_acked_children: None,
        }
    }

    /// Creates a bookmark node.
    #[must_use]
    pub fn bookmark(id: NodeId) -> Self {
        Self::new(id, NodeKind::Bookmark)
    }

    /// Creates a folder node.
    #[must_use]
    pub fn folder(id: NodeId) -> Self {
        Self::new(id, NodeKind::Folder)
    }

    /// Creates a stub placeholder for a node referenced before its defining
    /// record arrived.
    #[must_use]
    pub fn stub(id: NodeId) -> Self {
        let mut node = Self::new(id, NodeKind::Bookmark);
        node.is_stub = true;
        node
    }

    /// Returns true if this node is a folder.
    #[inline]
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Returns true if this node is a bookmark.
    #[inline]
    #[must_use]
    pub fn is_bookmark(&self) -> bool {
        self.kind == NodeKind::Bookmark
    }

    /// Stamps the dirty marker.
    pub fn mark_dirty(&mut self, at: DateTime<Utc>) {
        self.dirty_at = Some(at);
    }

    /// Clears the dirty marker.
    pub fn clear_dirty(&mut self) {
        self.dirty_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique() {
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn id_display_and_conversions() {
        let id = NodeId::new("F1");
        assert_eq!(id.to_string(), "F1");
        assert_eq!(id.as_str(), "F1");
        assert_eq!(NodeId::from("F1"), id);
        assert_eq!(String::from(id), "F1");
    }

    #[test]
    fn id_ordering() {
        assert!(NodeId::new("A") < NodeId::new("B"));
    }

    #[test]
    fn constructors() {
        let folder = BookmarkNode::folder(NodeId::new("F1"));
        assert!(folder.is_folder());
        assert!(!folder.is_stub);

        let bookmark = BookmarkNode::bookmark(NodeId::new("B1"));
        assert!(bookmark.is_bookmark());

        let stub = BookmarkNode::stub(NodeId::new("U1"));
        assert!(stub.is_stub);
        assert!(stub.title.is_none());
        assert!(stub.url.is_none());
    }

    #[test]
    fn dirty_marker() {
        let mut node = BookmarkNode::bookmark(NodeId::new("B1"));
        assert!(node.dirty_at.is_none());

        let now = Utc::now();
        node.mark_dirty(now);
        assert_eq!(node.dirty_at, Some(now));

        node.clear_dirty();
        assert!(node.dirty_at.is_none());
    }
}
