//! Translation between wire records and the local node model.
//!
//! `parse_record` turns a raw record into its semantic view;
//! `build_record` serializes a local node back into a record. Both confine
//! failures to the single item they occur on: callers drop that item and
//! keep the batch going.

use marksync_protocol::{
    ChildrenField, FieldCipher, IncomingChange, ProtocolError, ProtocolResult, RecordPayload,
    SyncRecord,
};
use marksync_tree::{BookmarkNode, NodeKind};

/// Post-encryption cap on a folder title.
pub const FOLDER_TITLE_LIMIT: usize = 2000;
/// Post-encryption cap on a bookmark title or url.
pub const BOOKMARK_FIELD_LIMIT: usize = 3000;

/// Parses a raw record into its semantic view.
///
/// A delta children object yields its `current` list.
///
/// # Errors
///
/// Fails when the record does not fit the wire schema; the caller drops
/// that one record.
pub fn parse_record(record: &SyncRecord) -> ProtocolResult<IncomingChange> {
    let change = match record.classify()? {
        RecordPayload::Tombstone => IncomingChange::deletion(record.id.clone()),
        RecordPayload::Bookmark { title, url } => IncomingChange {
            id: record.id.clone(),
            is_deleted: false,
            title: title.map(str::to_owned),
            url: url.map(str::to_owned),
            is_folder: false,
            children: Vec::new(),
            client_modified: record.client_last_modified,
        },
        RecordPayload::Folder { title, children } => IncomingChange {
            id: record.id.clone(),
            is_deleted: false,
            title: title.map(str::to_owned),
            url: None,
            is_folder: true,
            children: children.to_vec(),
            client_modified: record.client_last_modified,
        },
    };
    Ok(change)
}

/// Serializes a local node into a wire record.
///
/// A node pending deletion becomes a tombstone. Otherwise the title (and
/// url for bookmarks) is encrypted, and a folder's children are emitted as
/// a diff against its last acknowledged list once one exists, else as a
/// full list.
///
/// # Errors
///
/// Fails when a field exceeds its post-encryption cap or the cipher fails;
/// the caller excludes that one node from the outgoing batch.
pub fn build_record(node: &BookmarkNode, cipher: &dyn FieldCipher) -> ProtocolResult<SyncRecord> {
    if node.pending_deletion {
        return Ok(SyncRecord::tombstone(node.id.as_str()));
    }

    let record = match node.kind {
        NodeKind::Folder => {
            let title = encrypt_capped(cipher, node, node.title.as_deref(), "title", FOLDER_TITLE_LIMIT)?;
            SyncRecord::folder(node.id.as_str(), title, children_field(node))
        }
        NodeKind::Bookmark => {
            let title = encrypt_capped(cipher, node, node.title.as_deref(), "title", BOOKMARK_FIELD_LIMIT)?;
            let url = encrypt_capped(cipher, node, node.url.as_deref(), "url", BOOKMARK_FIELD_LIMIT)?;
            SyncRecord::bookmark(node.id.as_str(), title, url)
        }
    };

    Ok(match node.dirty_at {
        Some(at) => record.with_client_modified(at),
        None => record,
    })
}

fn encrypt_capped(
    cipher: &dyn FieldCipher,
    node: &BookmarkNode,
    plaintext: Option<&str>,
    field: &'static str,
    limit: usize,
) -> ProtocolResult<Option<String>> {
    let Some(plaintext) = plaintext else {
        return Ok(None);
    };
    let ciphertext = cipher.encrypt(plaintext)?;
    if ciphertext.len() > limit {
        return Err(ProtocolError::validation(
            node.id.as_str(),
            field,
            ciphertext.len(),
            limit,
        ));
    }
    Ok(Some(ciphertext))
}

fn children_field(node: &BookmarkNode) -> ChildrenField {
    let current: Vec<String> = node.children.iter().map(|c| c.as_str().to_owned()).collect();
    match &node.last_acked_children {
        Some(acked) => {
            let insert = node
                .children
                .iter()
                .filter(|c| !acked.contains(c))
                .map(|c| c.as_str().to_owned())
                .collect();
            let remove = acked
                .iter()
                .filter(|c| !node.children.contains(c))
                .map(|c| c.as_str().to_owned())
                .collect();
            ChildrenField::Delta {
                current,
                insert,
                remove,
            }
        }
        None => ChildrenField::Full(current),
    }
}
