//! Configuration for the sync provider.

use marksync_tree::NodeId;

/// Default number of commit attempts per round.
pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 5;

/// Configuration for one bookmark tree's sync provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// The root folder id. Never recreated, never removed.
    pub root_id: NodeId,
    /// Favorites-container ids, excluded from generic folder traversal.
    pub favorites_ids: Vec<NodeId>,
    /// How many times a conflicting commit is retried before surfacing.
    pub commit_attempts: u32,
}

impl ProviderConfig {
    /// Creates a configuration for a tree rooted at `root_id`.
    pub fn new(root_id: impl Into<NodeId>) -> Self {
        Self {
            root_id: root_id.into(),
            favorites_ids: Vec::new(),
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    /// Sets the favorites-container ids.
    #[must_use]
    pub fn with_favorites(mut self, ids: Vec<NodeId>) -> Self {
        self.favorites_ids = ids;
        self
    }

    /// Sets the commit attempt budget.
    #[must_use]
    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts;
        self
    }

    /// Returns true if `id` names a favorites container.
    #[must_use]
    pub fn is_favorites_container(&self, id: &NodeId) -> bool {
        self.favorites_ids.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = ProviderConfig::new("root")
            .with_favorites(vec![NodeId::new("fav")])
            .with_commit_attempts(3);
        assert_eq!(config.root_id, NodeId::new("root"));
        assert!(config.is_favorites_container(&NodeId::new("fav")));
        assert!(!config.is_favorites_container(&NodeId::new("root")));
        assert_eq!(config.commit_attempts, 3);
    }

    #[test]
    fn default_commit_attempts() {
        assert_eq!(ProviderConfig::new("root").commit_attempts, DEFAULT_COMMIT_ATTEMPTS);
    }
}
