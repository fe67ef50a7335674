//! # Marksync Tree
//!
//! Bookmark tree model and transactional store for marksync.
//!
//! This crate provides:
//! - `BookmarkNode` and `NodeId` (the entity model)
//! - `TreeState` (the object graph with structural invariants)
//! - `TreeStore` (snapshot transactions with commit-conflict signalling)
//! - `MemoryTreeStore` (versioned in-memory store, scriptable conflicts)
//!
//! ## Key Invariants
//!
//! - Node ids are unique across the whole tree
//! - The structure is a tree, not a graph: reparenting detaches before it
//!   attaches, and cycles are rejected as structural errors
//! - The root folder is never removed
//! - Favorites membership is tracked on both sides (container order list
//!   and per-node membership set) and kept in lock-step

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod node;
mod store;
mod tree;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryTreeStore;
pub use node::{BookmarkNode, NodeId, NodeKind};
pub use store::{TreeStore, TreeTransaction};
pub use tree::TreeState;
