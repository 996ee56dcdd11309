//! Durable storage for queued operations.
//!
//! Provides an order-preserving operation store with pluggable backends:
//! - In-memory (ephemeral, tests)
//! - SQLite (persistent across restarts)

mod backend;
mod memory;
mod sqlite;

pub use backend::{OperationStore, StoreError, StoreResult, StoredOperation};
pub use memory::InMemoryOperationStore;
pub use sqlite::SqliteOperationStore;
