//! # Marksync Engine
//!
//! Bookmark-tree sync reconciliation engine.
//!
//! This crate provides:
//! - The syncable adapter (wire record ⇄ semantic view)
//! - The response handler (the reconciliation algorithm)
//! - The sync provider (drives one round with commit-conflict retry)
//!
//! ## Architecture
//!
//! One sync round flows **adapter → handler → provider** upward for
//! outgoing data and **provider → handler → adapter** downward for
//! incoming data. The provider owns the transaction boundary: all
//! reconciliation for one round executes inside a single store
//! transaction, and a conflicting commit discards the view and re-runs the
//! pure computation against a fresh one.
//!
//! ## Key Invariants
//!
//! - A failed round never partially applies
//! - Reconciling the same batch twice yields the same tree (idempotence)
//! - Per-item failures (oversized field, undecryptable value) drop only
//!   that item, never the batch
//! - A local edit newer than the round's client timestamp keeps its
//!   content; the server still decides placement

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod clock;
mod config;
mod error;
mod handler;
mod metrics;
mod provider;

pub use adapter::{build_record, parse_record, BOOKMARK_FIELD_LIMIT, FOLDER_TITLE_LIMIT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ProviderConfig, DEFAULT_COMMIT_ATTEMPTS};
pub use error::{SyncError, SyncResult};
pub use handler::{reconcile, MergeMode, ReconcileOutcome};
pub use metrics::{NoopMetrics, ReconcileMetrics};
pub use provider::{NoopDelegate, RoundReport, SyncDelegate, SyncProvider};
