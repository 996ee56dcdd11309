//! Queue entries and loop signals.

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::operation::Operation;

/// Payload passed to the execution loop when it is woken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSignal {
    /// Skip the settling window.
    pub force: bool,
    /// Time already waited, subtracted from the first settling wait.
    pub previous_waited_time: Duration,
}

impl LoopSignal {
    pub fn new(force: bool) -> Self {
        Self {
            force,
            previous_waited_time: Duration::ZERO,
        }
    }

    /// Non-forced signal sent after already waiting `waited`.
    pub fn after_wait(waited: Duration) -> Self {
        Self {
            force: false,
            previous_waited_time: waited,
        }
    }
}

/// An operation waiting in the queue.
pub struct QueueItem {
    pub operation: Box<dyn Operation>,
    waiter: Option<oneshot::Sender<bool>>,
    pub bucket: u64,
    pub retries: u32,
}

impl QueueItem {
    pub fn new(operation: Box<dyn Operation>, bucket: u64) -> Self {
        Self {
            operation,
            waiter: None,
            bucket,
            retries: 0,
        }
    }

    pub fn with_waiter(mut self, waiter: oneshot::Sender<bool>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    pub fn id(&self) -> &str {
        self.operation.id()
    }

    pub fn has_waiter(&self) -> bool {
        self.waiter.is_some()
    }

    /// Deliver the outcome to an awaiting caller. Later calls are no-ops.
    pub fn wake(&mut self, succeeded: bool) {
        if let Some(waiter) = self.waiter.take() {
            // The caller may have stopped waiting.
            let _ = waiter.send(succeeded);
        }
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("id", &self.operation.id())
            .field("name", &self.operation.name())
            .field("bucket", &self.bucket)
            .field("retries", &self.retries)
            .field("waiter", &self.waiter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::testing::TestOperation;

    #[tokio::test]
    async fn test_wake_delivers_once() {
        let (tx, rx) = oneshot::channel();
        let mut item = QueueItem::new(TestOperation::new("track").boxed(), 0).with_waiter(tx);

        assert!(item.has_waiter());
        item.wake(true);
        item.wake(false);
        assert!(!item.has_waiter());
        assert!(rx.await.unwrap());
    }

    #[test]
    fn test_wake_without_waiter_is_noop() {
        let mut item = QueueItem::new(TestOperation::new("track").boxed(), 2);
        item.wake(true);
        assert_eq!(item.bucket, 2);
        assert_eq!(item.retries, 0);
    }
}
