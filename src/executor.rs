//! Executor contract and the name → executor registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::operation::Operation;

/// Outcome code reported by an executor for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Every operation in the batch succeeded.
    Success,
    /// Only the starting operation succeeded; the rest should run again later.
    SuccessStartingOnly,
    /// Transient failure; retry the whole batch with backoff.
    FailRetry,
    /// Permanent failure, do not retry.
    FailNoRetry,
    /// Permanent failure caused by missing or rejected credentials.
    FailUnauthorized,
    /// Permanent failure caused by a conflicting remote state.
    FailConflict,
    /// Stop processing the queue until it is restarted.
    FailPause,
}

impl ExecutionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SuccessStartingOnly => "success_starting_only",
            Self::FailRetry => "fail_retry",
            Self::FailNoRetry => "fail_no_retry",
            Self::FailUnauthorized => "fail_unauthorized",
            Self::FailConflict => "fail_conflict",
            Self::FailPause => "fail_pause",
        }
    }
}

/// Everything an executor reports back about one batch.
#[derive(Debug)]
pub struct ExecutionResponse {
    pub result: ExecutionResult,
    /// Provisional → permanent ID mappings assigned by the backend.
    pub id_translations: Option<HashMap<String, String>>,
    /// Follow-up operations to run before anything else in the queue.
    pub operations: Option<Vec<Box<dyn Operation>>>,
    /// Server-suggested wait before the next request.
    pub retry_after_seconds: Option<u64>,
}

impl ExecutionResponse {
    pub fn new(result: ExecutionResult) -> Self {
        Self {
            result,
            id_translations: None,
            operations: None,
            retry_after_seconds: None,
        }
    }

    pub fn with_id_translations(mut self, translations: HashMap<String, String>) -> Self {
        self.id_translations = Some(translations);
        self
    }

    pub fn with_operations(mut self, operations: Vec<Box<dyn Operation>>) -> Self {
        self.operations = Some(operations);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }
}

impl From<ExecutionResult> for ExecutionResponse {
    fn from(result: ExecutionResult) -> Self {
        Self::new(result)
    }
}

/// Runs batches of operations against the remote backend.
///
/// A batch may be delivered again after a retry, so `execute` must tolerate
/// seeing the same logical operations more than once.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Operation names this executor serves.
    fn operations(&self) -> Vec<String>;

    /// Execute an ordered batch. The first operation is the batch's starting
    /// operation; errors are treated as permanent failures of the batch.
    async fn execute(&self, operations: &[&dyn Operation]) -> anyhow::Result<ExecutionResponse>;
}

/// Maps operation names to the executor that serves them.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn OperationExecutor>>,
}

impl ExecutorRegistry {
    pub fn new(executors: Vec<Arc<dyn OperationExecutor>>) -> Self {
        let mut registry = Self::default();
        for executor in executors {
            registry.register(executor);
        }
        registry
    }

    /// Register an executor for every name it declares. A later registration
    /// for the same name replaces the earlier one.
    pub fn register(&mut self, executor: Arc<dyn OperationExecutor>) {
        for name in executor.operations() {
            if self.executors.insert(name.clone(), executor.clone()).is_some() {
                warn!(name = %name, "Replacing previously registered executor");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OperationExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(Vec<&'static str>);

    #[async_trait]
    impl OperationExecutor for Named {
        fn operations(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }

        async fn execute(&self, _operations: &[&dyn Operation]) -> anyhow::Result<ExecutionResponse> {
            Ok(ExecutionResult::Success.into())
        }
    }

    #[test]
    fn test_registry_maps_every_declared_name() {
        let registry = ExecutorRegistry::new(vec![
            Arc::new(Named(vec!["create-user", "update-user"])),
            Arc::new(Named(vec!["track"])),
        ]);

        assert_eq!(registry.names(), vec!["create-user", "track", "update-user"]);
        assert!(registry.get("track").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_response_builder() {
        let response = ExecutionResponse::new(ExecutionResult::FailRetry).with_retry_after(3);
        assert_eq!(response.result, ExecutionResult::FailRetry);
        assert_eq!(response.retry_after_seconds, Some(3));
        assert!(response.operations.is_none());
    }
}
