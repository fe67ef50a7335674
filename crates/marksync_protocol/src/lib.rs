//! # Marksync Protocol
//!
//! Wire record schema and field-level crypto for marksync.
//!
//! This crate provides:
//! - `SyncRecord`: the wire-format change record, validated at decode time
//! - `IncomingChange`: the adapted semantic view of one record
//! - `FieldCipher`: the encrypt/decrypt seam for title and url fields,
//!   with an AES-256-GCM implementation
//!
//! This is a pure protocol crate with no store dependency and no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod crypto;
mod error;
mod record;

pub use change::IncomingChange;
pub use crypto::{AesGcmFieldCipher, CipherError, CipherResult, FieldCipher, FieldKey, FIELD_KEY_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use record::{ChildrenField, FolderField, PageField, RecordPayload, SyncRecord};
