//! SCRUTONET State Management
//!
//! The authenticated key/value store backing the voting state machine,
//! split into named subtrees (`app`, `process`, `vote`). The composite
//! hash of the subtree roots is the per-block app hash.
//!
//! # Discipline
//! - Writes go to an in-memory working set under the store-wide write lock.
//! - `commit` atomically persists the working set and advances the committed
//!   snapshot; `rollback` discards it.
//! - Readers on the committed snapshot never take the write lock.

pub mod tree;
pub mod store;

pub use store::{process_key, vote_key, SharedStore, Store};
pub use tree::{Subtree, TreeName};
