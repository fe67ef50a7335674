//! The bookmark object graph and its structural operations.

use crate::error::{StoreError, StoreResult};
use crate::node::{BookmarkNode, NodeId, NodeKind};
use std::collections::BTreeMap;

/// The full bookmark tree state inside one transaction view.
///
/// `TreeState` owns every node plus the tree-wide metadata that must commit
/// atomically with the nodes (the server cursor). All structural operations
/// preserve the tree invariants: unique ids, acyclic parent links, root
/// never removed, favorites membership tracked on both sides.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeState {
    nodes: BTreeMap<NodeId, BookmarkNode>,
    root: NodeId,
    favorites_containers: Vec<NodeId>,
    server_cursor: Option<String>,
}

impl TreeState {
    /// Creates a tree with the given root folder and favorites containers.
    ///
    /// The root and each container are materialized as folder nodes; the
    /// containers live outside the root subtree.
    pub fn new(root: NodeId, favorites_containers: &[NodeId]) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(root.clone(), BookmarkNode::folder(root.clone()));
        for id in favorites_containers {
            nodes
                .entry(id.clone())
                .or_insert_with(|| BookmarkNode::folder(id.clone()));
        }
        Self {
            nodes,
            root,
            favorites_containers: favorites_containers.to_vec(),
            server_cursor: None,
        }
    }

    /// The root folder id.
    #[must_use]
    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    /// The favorites-container ids.
    #[must_use]
    pub fn favorites_containers(&self) -> &[NodeId] {
        &self.favorites_containers
    }

    /// Returns true for the root or a favorites container.
    #[must_use]
    pub fn is_well_known(&self, id: &NodeId) -> bool {
        *id == self.root || self.favorites_containers.contains(id)
    }

    /// The persisted server cursor, if any.
    #[must_use]
    pub fn server_cursor(&self) -> Option<&str> {
        self.server_cursor.as_deref()
    }

    /// Replaces the persisted server cursor.
    pub fn set_server_cursor(&mut self, cursor: Option<String>) {
        self.server_cursor = cursor;
    }

    /// Looks up a node.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&BookmarkNode> {
        self.nodes.get(id)
    }

    /// Looks up a node mutably.
    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut BookmarkNode> {
        self.nodes.get_mut(id)
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes, well-known ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if only well-known nodes exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes
            .keys()
            .all(|id| self.is_well_known(id))
    }

    /// Iterates all nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &BookmarkNode> {
        self.nodes.values()
    }

    /// All node ids in id order.
    #[must_use]
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Inserts a new node.
    ///
    /// The node must be detached; its id must be free.
    pub fn insert(&mut self, node: BookmarkNode) -> StoreResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(StoreError::structure(format!(
                "duplicate node id {}",
                node.id
            )));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// A folder's current child ids (empty for bookmarks and unknown ids).
    #[must_use]
    pub fn children(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Detaches a node from its parent. No-op if already detached.
    pub fn detach(&mut self, id: &NodeId) {
        let Some(parent_id) = self.nodes.get(id).and_then(|n| n.parent.clone()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            parent.children.retain(|c| c != id);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = None;
        }
    }

    /// Detaches every child of a folder, leaving the children in the store.
    pub fn detach_children(&mut self, id: &NodeId) {
        let Some(folder) = self.nodes.get_mut(id) else {
            return;
        };
        let children = std::mem::take(&mut folder.children);
        for child_id in children {
            if let Some(child) = self.nodes.get_mut(&child_id) {
                child.parent = None;
            }
        }
    }

    /// Moves a node under a new parent, appending it to the parent's
    /// children.
    ///
    /// The move detaches first, then attaches; attaching a node above
    /// itself is rejected as a structural error before anything mutates.
    pub fn move_to(&mut self, id: &NodeId, new_parent: &NodeId) -> StoreResult<()> {
        if !self.nodes.contains_key(id) {
            return Err(StoreError::structure(format!("unknown node {id}")));
        }
        let Some(parent) = self.nodes.get(new_parent) else {
            return Err(StoreError::structure(format!(
                "unknown parent {new_parent}"
            )));
        };
        if !parent.is_folder() {
            return Err(StoreError::structure(format!(
                "parent {new_parent} is not a folder"
            )));
        }
        // Walk up from the target: finding `id` there means the node would
        // become its own ancestor.
        let mut cursor = Some(new_parent.clone());
        while let Some(current) = cursor {
            if current == *id {
                return Err(StoreError::structure(format!(
                    "moving {id} under {new_parent} would create a cycle"
                )));
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent.clone());
        }

        self.detach(id);
        if let Some(parent) = self.nodes.get_mut(new_parent) {
            parent.children.push(id.clone());
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = Some(new_parent.clone());
        }
        Ok(())
    }

    /// Removes a node from the store.
    ///
    /// The node is detached from its parent and from every favorites
    /// container; its children are orphaned (kept, parent cleared). Removing
    /// the root is a structural error.
    pub fn remove(&mut self, id: &NodeId) -> StoreResult<()> {
        if *id == self.root {
            return Err(StoreError::structure("refusing to remove the root folder"));
        }
        let Some(node) = self.nodes.remove(id) else {
            return Ok(());
        };
        if let Some(parent_id) = &node.parent {
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                parent.children.retain(|c| c != id);
            }
        }
        for container_id in &node.favorites {
            if let Some(container) = self.nodes.get_mut(container_id) {
                container.children.retain(|c| c != id);
            }
        }
        for child_id in &node.children {
            if let Some(child) = self.nodes.get_mut(child_id) {
                if child.parent.as_ref() == Some(id) {
                    child.parent = None;
                }
                child.favorites.remove(id);
            }
        }
        Ok(())
    }

    /// Re-keys a node to a new id, preserving every link.
    ///
    /// Used by first-sync deduplication to unify a pre-existing local node
    /// with the incoming entity that represents the same bookmark or folder.
    pub fn rekey(&mut self, old: &NodeId, new: &NodeId) -> StoreResult<()> {
        if old == new {
            return Ok(());
        }
        if self.nodes.contains_key(new) {
            return Err(StoreError::structure(format!(
                "cannot re-key {old}: id {new} already exists"
            )));
        }
        let Some(mut node) = self.nodes.remove(old) else {
            return Err(StoreError::structure(format!(
                "cannot re-key unknown node {old}"
            )));
        };
        node.id = new.clone();

        if let Some(parent_id) = &node.parent {
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                for slot in &mut parent.children {
                    if slot == old {
                        *slot = new.clone();
                    }
                }
            }
        }
        for child_id in &node.children {
            if let Some(child) = self.nodes.get_mut(child_id) {
                if child.parent.as_ref() == Some(old) {
                    child.parent = Some(new.clone());
                }
                if child.favorites.remove(old) {
                    child.favorites.insert(new.clone());
                }
            }
        }
        for container_id in &node.favorites {
            if let Some(container) = self.nodes.get_mut(container_id) {
                for slot in &mut container.children {
                    if slot == old {
                        *slot = new.clone();
                    }
                }
            }
        }
        self.nodes.insert(new.clone(), node);
        Ok(())
    }

    /// Adds a member to a favorites container, moving it to the end of the
    /// container's order if it is already a member.
    pub fn favorite_add(&mut self, container_id: &NodeId, member_id: &NodeId) -> StoreResult<()> {
        if !self.nodes.contains_key(member_id) {
            return Err(StoreError::structure(format!(
                "unknown favorites member {member_id}"
            )));
        }
        let Some(container) = self.nodes.get_mut(container_id) else {
            return Err(StoreError::structure(format!(
                "unknown favorites container {container_id}"
            )));
        };
        container.children.retain(|c| c != member_id);
        container.children.push(member_id.clone());
        if let Some(member) = self.nodes.get_mut(member_id) {
            member.favorites.insert(container_id.clone());
        }
        Ok(())
    }

    /// Removes a member from a favorites container.
    pub fn favorite_remove(&mut self, container_id: &NodeId, member_id: &NodeId) {
        if let Some(container) = self.nodes.get_mut(container_id) {
            container.children.retain(|c| c != member_id);
        }
        if let Some(member) = self.nodes.get_mut(member_id) {
            member.favorites.remove(container_id);
        }
    }

    /// Clears a container's membership entirely.
    pub fn favorites_clear(&mut self, container_id: &NodeId) {
        let Some(container) = self.nodes.get_mut(container_id) else {
            return;
        };
        let members = std::mem::take(&mut container.children);
        for member_id in members {
            if let Some(member) = self.nodes.get_mut(&member_id) {
                member.favorites.remove(container_id);
            }
        }
    }

    /// The canonical node enumeration: pre-order over the root subtree,
    /// then the favorites containers in declared order, then every
    /// remaining node in id order.
    ///
    /// This single ordering serves both deduplication tie-breaks and
    /// outgoing batch assembly, so a given tree always enumerates the same
    /// way.
    #[must_use]
    pub fn scan_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut seen = std::collections::BTreeSet::new();

        let mut stack = vec![self.root.clone()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                order.push(id);
                for child in node.children.iter().rev() {
                    stack.push(child.clone());
                }
            }
        }
        for id in &self.favorites_containers {
            if self.nodes.contains_key(id) && seen.insert(id.clone()) {
                order.push(id.clone());
            }
        }
        for id in self.nodes.keys() {
            if seen.insert(id.clone()) {
                order.push(id.clone());
            }
        }
        order
    }

    /// Convenience: inserts a folder node.
    pub fn insert_folder(&mut self, id: NodeId) -> StoreResult<()> {
        self.insert(BookmarkNode::folder(id))
    }

    /// Convenience: inserts a bookmark node with the given content.
    pub fn insert_bookmark(
        &mut self,
        id: NodeId,
        title: Option<&str>,
        url: Option<&str>,
    ) -> StoreResult<()> {
        let mut node = BookmarkNode::bookmark(id);
        node.title = title.map(str::to_owned);
        node.url = url.map(str::to_owned);
        self.insert(node)
    }

    /// Convenience: creates a node of the given kind.
    pub fn create(&mut self, id: NodeId, kind: NodeKind) -> StoreResult<()> {
        let node = match kind {
            NodeKind::Bookmark => BookmarkNode::bookmark(id),
            NodeKind::Folder => BookmarkNode::folder(id),
        };
        self.insert(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> NodeId {
        NodeId::new("root")
    }

    fn tree() -> TreeState {
        TreeState::new(root(), &[NodeId::new("fav")])
    }

    #[test]
    fn new_tree_has_well_known_nodes() {
        let state = tree();
        assert!(state.contains(&root()));
        assert!(state.contains(&NodeId::new("fav")));
        assert!(state.is_well_known(&root()));
        assert!(state.is_well_known(&NodeId::new("fav")));
        assert!(state.is_empty());
    }

    #[test]
    fn move_to_attaches_and_detaches() {
        let mut state = tree();
        state.insert_folder(NodeId::new("F1")).unwrap();
        state.insert_bookmark(NodeId::new("B1"), Some("x"), Some("https://x.com")).unwrap();

        state.move_to(&NodeId::new("F1"), &root()).unwrap();
        state.move_to(&NodeId::new("B1"), &NodeId::new("F1")).unwrap();
        assert_eq!(state.children(&root()), vec![NodeId::new("F1")]);
        assert_eq!(state.children(&NodeId::new("F1")), vec![NodeId::new("B1")]);

        // Reparenting removes the old link first.
        state.move_to(&NodeId::new("B1"), &root()).unwrap();
        assert!(state.children(&NodeId::new("F1")).is_empty());
        assert_eq!(
            state.get(&NodeId::new("B1")).unwrap().parent,
            Some(root())
        );
    }

    #[test]
    fn move_to_rejects_cycles() {
        let mut state = tree();
        state.insert_folder(NodeId::new("A")).unwrap();
        state.insert_folder(NodeId::new("B")).unwrap();
        state.move_to(&NodeId::new("A"), &root()).unwrap();
        state.move_to(&NodeId::new("B"), &NodeId::new("A")).unwrap();

        let err = state.move_to(&NodeId::new("A"), &NodeId::new("B")).unwrap_err();
        assert!(matches!(err, StoreError::Structure { .. }));
        // Nothing mutated.
        assert_eq!(state.children(&root()), vec![NodeId::new("A")]);
        assert_eq!(state.children(&NodeId::new("A")), vec![NodeId::new("B")]);
    }

    #[test]
    fn move_to_rejects_bookmark_parent() {
        let mut state = tree();
        state.insert_bookmark(NodeId::new("B1"), None, None).unwrap();
        state.insert_bookmark(NodeId::new("B2"), None, None).unwrap();
        assert!(state.move_to(&NodeId::new("B2"), &NodeId::new("B1")).is_err());
    }

    #[test]
    fn remove_orphans_children_and_unlinks_favorites() {
        let mut state = tree();
        state.insert_folder(NodeId::new("F1")).unwrap();
        state.insert_bookmark(NodeId::new("B1"), None, None).unwrap();
        state.move_to(&NodeId::new("F1"), &root()).unwrap();
        state.move_to(&NodeId::new("B1"), &NodeId::new("F1")).unwrap();
        state.favorite_add(&NodeId::new("fav"), &NodeId::new("B1")).unwrap();

        state.remove(&NodeId::new("F1")).unwrap();
        assert!(!state.contains(&NodeId::new("F1")));
        assert!(state.children(&root()).is_empty());
        // B1 survives, orphaned, still a favorite.
        let b1 = state.get(&NodeId::new("B1")).unwrap();
        assert!(b1.parent.is_none());
        assert!(b1.favorites.contains(&NodeId::new("fav")));

        state.remove(&NodeId::new("B1")).unwrap();
        assert!(state.children(&NodeId::new("fav")).is_empty());
    }

    #[test]
    fn remove_root_is_structural_error() {
        let mut state = tree();
        assert!(matches!(
            state.remove(&root()),
            Err(StoreError::Structure { .. })
        ));
    }

    #[test]
    fn rekey_rewires_every_link() {
        let mut state = tree();
        state.insert_folder(NodeId::new("local-folder")).unwrap();
        state.insert_bookmark(NodeId::new("B1"), None, None).unwrap();
        state.move_to(&NodeId::new("local-folder"), &root()).unwrap();
        state.move_to(&NodeId::new("B1"), &NodeId::new("local-folder")).unwrap();
        state.favorite_add(&NodeId::new("fav"), &NodeId::new("local-folder")).unwrap();

        state.rekey(&NodeId::new("local-folder"), &NodeId::new("F-remote")).unwrap();

        assert!(!state.contains(&NodeId::new("local-folder")));
        assert_eq!(state.children(&root()), vec![NodeId::new("F-remote")]);
        assert_eq!(state.children(&NodeId::new("fav")), vec![NodeId::new("F-remote")]);
        let b1 = state.get(&NodeId::new("B1")).unwrap();
        assert_eq!(b1.parent, Some(NodeId::new("F-remote")));
        let renamed = state.get(&NodeId::new("F-remote")).unwrap();
        assert_eq!(renamed.id, NodeId::new("F-remote"));
        assert_eq!(renamed.children, vec![NodeId::new("B1")]);
    }

    #[test]
    fn rekey_to_existing_id_fails() {
        let mut state = tree();
        state.insert_bookmark(NodeId::new("B1"), None, None).unwrap();
        state.insert_bookmark(NodeId::new("B2"), None, None).unwrap();
        assert!(state.rekey(&NodeId::new("B1"), &NodeId::new("B2")).is_err());
    }

    #[test]
    fn favorite_add_moves_to_end() {
        let mut state = tree();
        let fav = NodeId::new("fav");
        state.insert_bookmark(NodeId::new("B1"), None, None).unwrap();
        state.insert_bookmark(NodeId::new("B2"), None, None).unwrap();

        state.favorite_add(&fav, &NodeId::new("B1")).unwrap();
        state.favorite_add(&fav, &NodeId::new("B2")).unwrap();
        state.favorite_add(&fav, &NodeId::new("B1")).unwrap();
        assert_eq!(state.children(&fav), vec![NodeId::new("B2"), NodeId::new("B1")]);
    }

    #[test]
    fn favorites_clear_updates_membership_sets() {
        let mut state = tree();
        let fav = NodeId::new("fav");
        state.insert_bookmark(NodeId::new("B1"), None, None).unwrap();
        state.favorite_add(&fav, &NodeId::new("B1")).unwrap();

        state.favorites_clear(&fav);
        assert!(state.children(&fav).is_empty());
        assert!(state.get(&NodeId::new("B1")).unwrap().favorites.is_empty());
    }

    #[test]
    fn scan_order_is_preorder_then_favorites_then_rest() {
        let mut state = tree();
        state.insert_folder(NodeId::new("A")).unwrap();
        state.insert_bookmark(NodeId::new("a1"), None, None).unwrap();
        state.insert_bookmark(NodeId::new("a2"), None, None).unwrap();
        state.insert_bookmark(NodeId::new("z-unrooted"), None, None).unwrap();
        state.insert_bookmark(NodeId::new("b-unrooted"), None, None).unwrap();
        state.move_to(&NodeId::new("A"), &root()).unwrap();
        state.move_to(&NodeId::new("a1"), &NodeId::new("A")).unwrap();
        state.move_to(&NodeId::new("a2"), &NodeId::new("A")).unwrap();

        let order = state.scan_order();
        assert_eq!(
            order,
            vec![
                root(),
                NodeId::new("A"),
                NodeId::new("a1"),
                NodeId::new("a2"),
                NodeId::new("fav"),
                NodeId::new("b-unrooted"),
                NodeId::new("z-unrooted"),
            ]
        );
    }

    #[test]
    fn server_cursor_roundtrip() {
        let mut state = tree();
        assert!(state.server_cursor().is_none());
        state.set_server_cursor(Some("cursor-42".into()));
        assert_eq!(state.server_cursor(), Some("cursor-42"));
    }
}
