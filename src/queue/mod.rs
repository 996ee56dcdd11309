//! Durable single-consumer operation queue.
//!
//! Producers enqueue operations from any task; one dedicated loop task
//! settles, selects a batch, executes it and interprets the outcome:
//!
//! ```text
//! Waiting -> Settling -> Selecting -> Executing -> Delaying -> Selecting ...
//!                            |                         |
//!                            +-- nothing eligible --> Waiting
//!                                                      +-- FailPause --> Paused (loop exits)
//! ```
//!
//! Every mutation of the in-memory queue happens under one mutex that is
//! never held across an `.await`. The durable store is updated at each
//! mutation point so a restart resumes with the same pending work.

mod backoff;
mod error;
mod item;
mod waiter;

pub use backoff::backoff_delay;
pub use error::QueueError;
pub use item::{LoopSignal, QueueItem};
pub use waiter::Waiter;

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::executor::{ExecutionResponse, ExecutionResult, ExecutorRegistry};
use crate::operation::{GroupMode, Operation};
use crate::records::RecordVisibility;
use crate::store::OperationStore;

/// Lightweight view of a queued operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    pub id: String,
    pub name: String,
    pub bucket: u64,
    pub retries: u32,
}

struct QueueState {
    items: VecDeque<QueueItem>,
    /// Bucket assigned to newly enqueued items. Bumped once per settling cycle.
    enqueue_bucket: u64,
}

impl QueueState {
    /// Highest bucket eligible to start a batch.
    fn execute_bucket(&self) -> u64 {
        if self.enqueue_bucket == 0 {
            0
        } else {
            self.enqueue_bucket - 1
        }
    }
}

/// Result of choosing the next batch.
enum Selection {
    Empty,
    Batch(Vec<QueueItem>),
    /// Grouping hit a caller mistake; the claimed items fail as a batch.
    Invalid {
        items: Vec<QueueItem>,
        error: QueueError,
    },
}

/// The operation queue and its execution loop.
pub struct OperationQueue {
    executors: ExecutorRegistry,
    store: Arc<dyn OperationStore>,
    records: Arc<dyn RecordVisibility>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    waiter: Waiter<LoopSignal>,
    retry_waiter: Waiter<LoopSignal>,
    paused: AtomicBool,
    running: AtomicBool,
    loaded: AtomicBool,
    initialized: watch::Sender<bool>,
}

impl OperationQueue {
    pub fn new(
        executors: ExecutorRegistry,
        store: Arc<dyn OperationStore>,
        records: Arc<dyn RecordVisibility>,
        config: QueueConfig,
    ) -> Arc<Self> {
        let (initialized, _) = watch::channel(false);
        Arc::new(Self {
            executors,
            store,
            records,
            config,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                enqueue_bucket: 0,
            }),
            waiter: Waiter::new(),
            retry_waiter: Waiter::new(),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            initialized,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the execution loop.
    ///
    /// Saved operations are loaded on the first start only. Calling `start`
    /// after a pause resumes processing; calling it while the loop is
    /// running does nothing and returns `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Operation queue already running");
            return None;
        }
        self.paused.store(false, Ordering::SeqCst);

        let queue = Arc::clone(self);
        Some(tokio::spawn(async move {
            if queue.loaded.swap(true, Ordering::SeqCst) {
                if !queue.is_empty() {
                    queue.waiter.wake(LoopSignal::new(false));
                }
            } else {
                queue.load_saved_operations();
            }
            queue.process_queue_forever().await;
            queue.running.store(false, Ordering::SeqCst);
        }))
    }

    /// Resolves once saved operations have been loaded into the queue.
    pub async fn await_initialized(&self) {
        let mut rx = self.initialized.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Enqueue an operation without waiting for its outcome.
    ///
    /// `flush` skips the settling window so the loop runs as soon as possible.
    pub fn enqueue(&self, mut operation: Box<dyn Operation>, flush: bool) {
        operation.set_id(Uuid::new_v4().to_string());
        debug!(operation_id = %operation.id(), name = %operation.name(), flush, "Enqueue");
        self.enqueue_item(QueueItem::new(operation, 0), flush, true, None);
    }

    /// Enqueue an operation and wait until it succeeds (`true`) or fails
    /// terminally (`false`). Retries keep the caller waiting.
    pub async fn enqueue_and_wait(&self, mut operation: Box<dyn Operation>, flush: bool) -> bool {
        operation.set_id(Uuid::new_v4().to_string());
        debug!(operation_id = %operation.id(), name = %operation.name(), flush, "Enqueue and wait");

        let (tx, rx) = oneshot::channel();
        self.enqueue_item(QueueItem::new(operation, 0).with_waiter(tx), flush, true, None);
        rx.await.unwrap_or(false)
    }

    /// Whether any queued operation has runtime type `T`.
    pub fn contains_instance_of<T: Operation + 'static>(&self) -> bool {
        self.lock_state()
            .items
            .iter()
            .any(|item| item.operation.is::<T>())
    }

    /// End any backoff in progress and wake the loop.
    pub fn force_execute(&self) {
        self.retry_waiter.wake(LoopSignal::new(true));
        self.waiter.wake(LoopSignal::new(false));
    }

    pub fn len(&self) -> usize {
        self.lock_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().items.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queued operations in execution order. Items of the batch currently
    /// executing are not included.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.lock_state()
            .items
            .iter()
            .map(|item| QueuedOperation {
                id: item.id().to_string(),
                name: item.operation.name().to_string(),
                bucket: item.bucket,
                retries: item.retries,
            })
            .collect()
    }

    pub fn queued_ids(&self) -> Vec<String> {
        self.lock_state()
            .items
            .iter()
            .map(|item| item.id().to_string())
            .collect()
    }

    /// Add an item tagged with the current bucket, optionally persist it,
    /// then wake the loop. An item whose id is already queued is dropped.
    fn enqueue_item(&self, mut item: QueueItem, flush: bool, persist: bool, index: Option<usize>) {
        {
            let mut state = self.lock_state();
            if state.items.iter().any(|queued| queued.id() == item.id()) {
                debug!(operation_id = %item.id(), "Operation already queued, skipping");
                return;
            }

            item.bucket = state.enqueue_bucket;
            if persist {
                let stored = match index {
                    Some(index) => self.store.insert(index, &*item.operation),
                    None => self.store.add(&*item.operation),
                };
                if let Err(e) = stored {
                    error!(operation_id = %item.id(), "Failed to persist operation: {}", e);
                }
            }

            match index {
                Some(index) => {
                    let index = index.min(state.items.len());
                    state.items.insert(index, item);
                }
                None => state.items.push_back(item),
            }
        }

        self.waiter.wake(LoopSignal::new(flush));
    }

    fn load_saved_operations(&self) {
        if let Err(e) = self.store.load_operations() {
            error!("Failed to load saved operations: {}", e);
        }

        match self.store.list() {
            Ok(operations) => {
                let count = operations.len();
                for (index, operation) in operations.into_iter().enumerate() {
                    self.enqueue_item(QueueItem::new(operation, 0), false, false, Some(index));
                }
                info!(count, "Loaded saved operations");
            }
            Err(e) => error!("Failed to list saved operations: {}", e),
        }

        self.initialized.send_replace(true);
    }

    async fn process_queue_forever(self: &Arc<Self>) {
        self.wait_for_new_operation_and_execution_interval().await;
        self.bump_bucket();

        loop {
            if self.is_paused() {
                info!("Operation queue paused");
                return;
            }

            match self.next_batch() {
                Selection::Batch(batch) => {
                    self.execute_operations(batch).await;
                    // Let operations enqueued right behind the one that woke
                    // us land before the next selection.
                    tokio::time::sleep(self.config.post_wake_delay()).await;
                }
                Selection::Invalid { items, error } => {
                    error!(batch_size = items.len(), "Invalid batch: {}", error);
                    self.fail_batch(items);
                }
                Selection::Empty => {
                    self.wait_for_new_operation_and_execution_interval().await;
                    self.bump_bucket();
                }
            }
        }
    }

    /// Wait for a signal, then for the execution interval to pass without a
    /// new one. Every new signal restarts the full interval; a forced signal
    /// ends the wait immediately.
    async fn wait_for_new_operation_and_execution_interval(&self) {
        let mut signal = self.waiter.wait().await;
        let interval = self.config.execution_interval();
        let mut remaining = interval.saturating_sub(signal.previous_waited_time);

        while !signal.force {
            match tokio::time::timeout(remaining, self.waiter.wait()).await {
                Ok(next) => {
                    signal = next;
                    remaining = interval;
                }
                Err(_) => break,
            }
        }
    }

    fn bump_bucket(&self) {
        let mut state = self.lock_state();
        state.enqueue_bucket += 1;
    }

    /// Pick the first startable, visible item within the execute bucket and
    /// everything that groups with it.
    fn next_batch(&self) -> Selection {
        let mut state = self.lock_state();
        let bucket_filter = state.execute_bucket();

        let position = state.items.iter().position(|item| {
            item.operation.can_start_execute()
                && self.records.can_access(item.operation.apply_to_record_id())
                && item.bucket <= bucket_filter
        });

        match position.and_then(|index| state.items.remove(index)) {
            Some(starting) => self.group_with(&mut state.items, starting),
            None => Selection::Empty,
        }
    }

    /// Claim every queued item whose comparison key matches the starting
    /// item's key for its grouping mode. Buckets are not checked here.
    fn group_with(&self, items: &mut VecDeque<QueueItem>, starting: QueueItem) -> Selection {
        let mode = starting.operation.group_mode();
        if mode == GroupMode::None {
            return Selection::Batch(vec![starting]);
        }

        let starting_key = starting.operation.comparison_key(mode);
        let mut batch = vec![starting];
        let mut index = 0;

        while index < items.len() {
            let item = &items[index];
            let item_key = item.operation.comparison_key(mode);

            if item_key.is_empty() && starting_key.is_empty() {
                let name = batch[0].operation.name().to_string();
                return Selection::Invalid {
                    items: batch,
                    error: QueueError::BlankComparisonKeys(name),
                };
            }

            if item_key == starting_key
                && self.records.can_access(item.operation.apply_to_record_id())
            {
                if let Some(claimed) = items.remove(index) {
                    batch.push(claimed);
                }
            } else {
                index += 1;
            }
        }

        Selection::Batch(batch)
    }

    async fn execute_operations(self: &Arc<Self>, mut batch: Vec<QueueItem>) {
        let response = match self.dispatch(&batch).await {
            Ok(response) => response,
            Err(e) => {
                error!(batch_size = batch.len(), "Error executing operations: {}", e);
                self.fail_batch(batch);
                return;
            }
        };
        debug!(result = response.result.as_str(), batch_size = batch.len(), "Execute response");

        if let Some(translations) = response.id_translations.as_ref() {
            self.apply_id_translations(&mut batch, translations);
        }

        let mut highest_retries = 0;
        match response.result {
            ExecutionResult::Success => {
                self.finish_batch(batch, true);
            }
            ExecutionResult::FailUnauthorized
            | ExecutionResult::FailNoRetry
            | ExecutionResult::FailConflict => {
                error!(
                    result = response.result.as_str(),
                    operations = ?batch,
                    "Operation execution failed without retry"
                );
                self.finish_batch(batch, false);
            }
            ExecutionResult::SuccessStartingOnly => {
                let mut items = batch.into_iter();
                if let Some(mut starting) = items.next() {
                    self.remove_from_store(starting.id());
                    starting.wake(true);
                }
                self.requeue_front(items.collect());
            }
            ExecutionResult::FailRetry => {
                for item in batch.iter_mut() {
                    item.retries += 1;
                    highest_retries = highest_retries.max(item.retries);
                }
                error!(operations = ?batch, "Operation execution failed, retrying");
                self.requeue_front(batch);
            }
            ExecutionResult::FailPause => {
                error!(operations = ?batch, "Operation execution failed, pausing queue");
                self.paused.store(true, Ordering::SeqCst);
                self.requeue_front(batch);
            }
        }

        if let Some(operations) = response.operations {
            self.enqueue_follow_ups(operations);
        }

        self.delay_before_next_execution(highest_retries, response.retry_after_seconds)
            .await;
    }

    async fn dispatch(&self, batch: &[QueueItem]) -> Result<ExecutionResponse, QueueError> {
        let name = batch
            .first()
            .map(|item| item.operation.name().to_string())
            .unwrap_or_default();
        let executor = self
            .executors
            .get(&name)
            .ok_or_else(|| QueueError::NoExecutor(name.clone()))?;

        let operations: Vec<&dyn Operation> = batch.iter().map(|item| &*item.operation).collect();
        match AssertUnwindSafe(executor.execute(&operations))
            .catch_unwind()
            .await
        {
            Ok(result) => Ok(result?),
            Err(panic) => Err(QueueError::ExecutorPanicked(panic_message(panic.as_ref()))),
        }
    }

    /// Rewrite provisional ids everywhere and hold back operations on the
    /// new records until the post-create delay has passed.
    fn apply_id_translations(
        self: &Arc<Self>,
        batch: &mut [QueueItem],
        translations: &HashMap<String, String>,
    ) {
        for item in batch.iter_mut() {
            self.translate_and_persist(item, translations);
        }
        {
            let mut state = self.lock_state();
            for item in state.items.iter_mut() {
                self.translate_and_persist(item, translations);
            }
        }
        for id in translations.values() {
            self.records.add(id);
        }
        self.schedule_post_create_wake();
    }

    /// Translate one item and write it back to the store if its payload changed.
    fn translate_and_persist(&self, item: &mut QueueItem, translations: &HashMap<String, String>) {
        let before = item.operation.to_json().ok();
        item.operation.translate_ids(translations);
        if item.operation.to_json().ok() == before {
            return;
        }
        if let Err(e) = self.store.update(&*item.operation) {
            error!(operation_id = %item.id(), "Failed to persist translated operation: {}", e);
        }
    }

    /// Re-signal the loop once the new records should be visible, if there
    /// is still work queued by then.
    fn schedule_post_create_wake(self: &Arc<Self>) {
        let delay = self.config.post_create_delay();
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                if !queue.is_empty() {
                    queue.waiter.wake(LoopSignal::after_wait(delay));
                }
            }
        });
    }

    /// Remove every item from the store and deliver `succeeded` to waiters.
    fn finish_batch(&self, batch: Vec<QueueItem>, succeeded: bool) {
        for mut item in batch {
            self.remove_from_store(item.id());
            item.wake(succeeded);
        }
    }

    fn fail_batch(&self, batch: Vec<QueueItem>) {
        self.finish_batch(batch, false);
    }

    fn remove_from_store(&self, id: &str) {
        if let Err(e) = self.store.remove(id) {
            warn!(operation_id = %id, "Failed to remove operation from store: {}", e);
        }
    }

    /// Put items back at the head of the queue, keeping their order.
    fn requeue_front(&self, items: Vec<QueueItem>) {
        let mut state = self.lock_state();
        for item in items.into_iter().rev() {
            state.items.push_front(item);
        }
    }

    /// Follow-up operations run before anything else, in the given order.
    fn enqueue_follow_ups(&self, operations: Vec<Box<dyn Operation>>) {
        let mut state = self.lock_state();
        for mut operation in operations.into_iter().rev() {
            operation.set_id(Uuid::new_v4().to_string());
            if let Err(e) = self.store.insert(0, &*operation) {
                error!(operation_id = %operation.id(), "Failed to persist follow-up operation: {}", e);
            }
            state.items.push_front(QueueItem::new(operation, 0));
        }
    }

    async fn delay_before_next_execution(&self, retries: u32, retry_after_seconds: Option<u64>) {
        let delay = backoff_delay(retries, self.config.retry_backoff(), retry_after_seconds);
        if delay.is_zero() {
            return;
        }
        warn!(delay_ms = delay.as_millis() as u64, retries, "Delaying next execution");
        let _ = tokio::time::timeout(delay, self.retry_waiter.wait()).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
