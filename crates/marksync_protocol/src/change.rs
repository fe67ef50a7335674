//! The adapted semantic view of one incoming record.

use chrono::{DateTime, Utc};

/// One incoming change after wire-shape validation.
///
/// `title` and `url` are still encrypted here: decryption happens inside
/// the reconciliation pass so that a per-item cipher failure can drop just
/// that item. A delta children object has already collapsed to its
/// authoritative `current` list.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingChange {
    /// Entity id.
    pub id: String,
    /// The entity was deleted on the service.
    pub is_deleted: bool,
    /// Encrypted title, if any.
    pub title: Option<String>,
    /// Encrypted url, if any (bookmarks).
    pub url: Option<String>,
    /// The record describes a folder.
    pub is_folder: bool,
    /// Ordered child ids (folders).
    pub children: Vec<String>,
    /// Client-supplied modification time, if any.
    pub client_modified: Option<DateTime<Utc>>,
}

impl IncomingChange {
    /// Creates a deletion change.
    #[must_use]
    pub fn deletion(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_deleted: true,
            title: None,
            url: None,
            is_folder: false,
            children: Vec::new(),
            client_modified: None,
        }
    }
}
