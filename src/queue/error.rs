//! Operation queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No executor registered for operation '{0}'")]
    NoExecutor(String),
    #[error("Both comparison keys are blank for grouped operation '{0}'")]
    BlankComparisonKeys(String),
    #[error("Executor failed: {0}")]
    Executor(#[from] anyhow::Error),
    #[error("Executor panicked: {0}")]
    ExecutorPanicked(String),
}
