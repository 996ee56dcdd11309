//! Pluggable backend trait for operation storage.

use serde::Serialize;

use crate::operation::Operation;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from operation store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("No decoder registered for operation '{0}'")]
    UnknownOperation(String),
    #[error("Operation '{0}' has no id assigned")]
    MissingId(String),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// A persisted operation as stored, before decoding.
#[derive(Debug, Clone, Serialize)]
pub struct StoredOperation {
    pub id: String,
    pub name: String,
    pub position: i64,
    pub data: serde_json::Value,
    pub created_at: String,
}

impl StoredOperation {
    pub(crate) fn from_operation(op: &dyn Operation) -> StoreResult<Self> {
        if op.id().is_empty() {
            return Err(StoreError::MissingId(op.name().to_string()));
        }
        Ok(Self {
            id: op.id().to_string(),
            name: op.name().to_string(),
            position: 0,
            data: op.to_json()?,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Trait for operation storage backends.
///
/// Implementations must preserve insertion order and be safe to call from
/// producers and the execution loop concurrently. Calls are synchronous and
/// run on the calling task's thread, so they must stay short. The queue
/// holds its own lock across `add`, `insert` and `update` so stored order
/// matches queue order; `remove` is called without it.
pub trait OperationStore: Send + Sync {
    /// Append an operation to the end of the store.
    fn add(&self, op: &dyn Operation) -> StoreResult<()>;

    /// Insert an operation at `index` (clamped to the current length).
    fn insert(&self, index: usize, op: &dyn Operation) -> StoreResult<()>;

    /// Rewrite the stored payload of an operation, keeping its position.
    /// Updating an unknown id is not an error.
    fn update(&self, op: &dyn Operation) -> StoreResult<()>;

    /// Remove an operation by id. Removing an unknown id is not an error.
    fn remove(&self, id: &str) -> StoreResult<()>;

    /// Load persisted operations from the backing storage.
    fn load_operations(&self) -> StoreResult<()>;

    /// All loaded operations in stored order.
    fn list(&self) -> StoreResult<Vec<Box<dyn Operation>>>;
}
