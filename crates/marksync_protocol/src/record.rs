//! The wire-format change record.
//!
//! One record describes one entity's new state as seen by the sync
//! service. The shape is deliberately sparse: a tombstone carries only
//! `deleted`, a bookmark carries `title`/`page`, a folder carries
//! `title`/`folder`. `title` and `page.url` are encrypted field values.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookmark's page payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageField {
    /// Encrypted target url.
    pub url: String,
}

/// A folder's children payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderField {
    /// Child order, full or as a delta.
    pub children: ChildrenField,
}

/// A folder's child list on the wire.
///
/// Senders emit a full list until the receiver has acknowledged one, then
/// switch to deltas. In a delta, `current` is authoritative for reads;
/// `insert` and `remove` only describe how it differs from the last
/// acknowledged list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildrenField {
    /// The complete ordered child list.
    Full(Vec<String>),
    /// A diff against the last acknowledged list.
    Delta {
        /// The complete ordered child list after the change.
        current: Vec<String>,
        /// Ids added since the last acknowledged list.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        insert: Vec<String>,
        /// Ids removed since the last acknowledged list.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        remove: Vec<String>,
    },
}

impl ChildrenField {
    /// The authoritative child list.
    #[must_use]
    pub fn current(&self) -> &[String] {
        match self {
            ChildrenField::Full(children) => children,
            ChildrenField::Delta { current, .. } => current,
        }
    }
}

/// The validated shape of one record.
///
/// Computed at decode time so downstream code never probes optional fields:
/// a record is exactly one of a tombstone, a bookmark, or a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload<'a> {
    /// The entity was deleted on the service.
    Tombstone,
    /// A bookmark with encrypted title and url.
    Bookmark {
        /// Encrypted title, if any.
        title: Option<&'a str>,
        /// Encrypted url, if any.
        url: Option<&'a str>,
    },
    /// A folder with encrypted title and its child order.
    Folder {
        /// Encrypted title, if any.
        title: Option<&'a str>,
        /// The authoritative child list.
        children: &'a [String],
    },
}

/// One change record on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Entity id.
    pub id: String,

    /// Present (as an empty string) on tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<String>,

    /// Encrypted title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Bookmark payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageField>,

    /// Folder payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderField>,

    /// Client-supplied modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_last_modified: Option<DateTime<Utc>>,
}

impl SyncRecord {
    /// Creates a tombstone record.
    #[must_use]
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deleted: Some(String::new()),
            title: None,
            page: None,
            folder: None,
            client_last_modified: None,
        }
    }

    /// Creates a bookmark record from already-encrypted fields.
    #[must_use]
    pub fn bookmark(id: impl Into<String>, title: Option<String>, url: Option<String>) -> Self {
        Self {
            id: id.into(),
            deleted: None,
            title,
            page: url.map(|url| PageField { url }),
            folder: None,
            client_last_modified: None,
        }
    }

    /// Creates a folder record from an already-encrypted title.
    #[must_use]
    pub fn folder(id: impl Into<String>, title: Option<String>, children: ChildrenField) -> Self {
        Self {
            id: id.into(),
            deleted: None,
            title,
            page: None,
            folder: Some(FolderField { children }),
            client_last_modified: None,
        }
    }

    /// Sets the client modification time.
    #[must_use]
    pub fn with_client_modified(mut self, at: DateTime<Utc>) -> Self {
        self.client_last_modified = Some(at);
        self
    }

    /// Returns true if this record is a tombstone.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.deleted.is_some()
    }

    /// Validates the record shape and returns its tagged payload.
    ///
    /// # Errors
    ///
    /// A record carrying both `page` and `folder` does not fit the schema.
    pub fn classify(&self) -> ProtocolResult<RecordPayload<'_>> {
        if self.deleted.is_some() {
            return Ok(RecordPayload::Tombstone);
        }
        match (&self.page, &self.folder) {
            (Some(_), Some(_)) => Err(ProtocolError::decode(format!(
                "record {} carries both page and folder payloads",
                self.id
            ))),
            (Some(page), None) => Ok(RecordPayload::Bookmark {
                title: self.title.as_deref(),
                url: Some(&page.url),
            }),
            (None, Some(folder)) => Ok(RecordPayload::Folder {
                title: self.title.as_deref(),
                children: folder.children.current(),
            }),
            // A bare record (title only, or nothing) is a url-less bookmark.
            (None, None) => Ok(RecordPayload::Bookmark {
                title: self.title.as_deref(),
                url: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bookmark_wire_shape() {
        let record = SyncRecord::bookmark("B1", Some("enc-title".into()), Some("enc-url".into()));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "B1",
                "title": "enc-title",
                "page": { "url": "enc-url" }
            })
        );
    }

    #[test]
    fn tombstone_wire_shape() {
        let value = serde_json::to_value(SyncRecord::tombstone("B1")).unwrap();
        assert_eq!(value, json!({ "id": "B1", "deleted": "" }));
    }

    #[test]
    fn folder_full_children_roundtrip() {
        let record = SyncRecord::folder(
            "F1",
            None,
            ChildrenField::Full(vec!["B1".into(), "B2".into()]),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({ "id": "F1", "folder": { "children": ["B1", "B2"] } })
        );
        let back: SyncRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn folder_delta_children_roundtrip() {
        let record = SyncRecord::folder(
            "F1",
            None,
            ChildrenField::Delta {
                current: vec!["B1".into(), "B3".into()],
                insert: vec!["B3".into()],
                remove: vec!["B2".into()],
            },
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "F1",
                "folder": {
                    "children": {
                        "current": ["B1", "B3"],
                        "insert": ["B3"],
                        "remove": ["B2"]
                    }
                }
            })
        );
        let back: SyncRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.folder.unwrap().children.current(), ["B1", "B3"]);
    }

    #[test]
    fn delta_current_is_authoritative() {
        let children = ChildrenField::Delta {
            current: vec!["A".into()],
            insert: vec![],
            remove: vec!["B".into()],
        };
        assert_eq!(children.current(), ["A"]);
    }

    #[test]
    fn classify_rejects_page_and_folder() {
        let record: SyncRecord = serde_json::from_value(json!({
            "id": "X1",
            "page": { "url": "enc" },
            "folder": { "children": [] }
        }))
        .unwrap();
        assert!(matches!(
            record.classify(),
            Err(ProtocolError::Decode { .. })
        ));
    }

    #[test]
    fn classify_tombstone_wins() {
        let record: SyncRecord = serde_json::from_value(json!({
            "id": "X1",
            "deleted": "",
            "title": "enc"
        }))
        .unwrap();
        assert_eq!(record.classify().unwrap(), RecordPayload::Tombstone);
    }

    #[test]
    fn client_modified_is_iso8601() {
        let at = DateTime::parse_from_rfc3339("2026-08-07T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = SyncRecord::bookmark("B1", None, None).with_client_modified(at);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["client_last_modified"], "2026-08-07T12:00:00Z");
    }
}
