//! opqueue - durable single-consumer operation queue.
//!
//! Operations are persisted as they are enqueued, coalesced into batches,
//! and executed one batch at a time against executors registered by
//! operation name. Failed batches are retried with backoff or dropped
//! depending on the outcome the executor reports.

pub mod config;
pub mod executor;
pub mod operation;
pub mod queue;
pub mod records;
pub mod store;

pub use config::{Config, QueueConfig, Settings};
pub use executor::{ExecutionResponse, ExecutionResult, ExecutorRegistry, OperationExecutor};
pub use operation::{GroupMode, Operation, OperationRegistry};
pub use queue::{OperationQueue, QueueError, QueuedOperation};
pub use records::{AlwaysVisible, NewRecordsState, RecordVisibility};
pub use store::{InMemoryOperationStore, OperationStore, SqliteOperationStore, StoreError};
