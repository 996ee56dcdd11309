//! Wake/wait signal carrying a payload.
//!
//! A `Waiter` holds at most one pending value. `wake` replaces any value not
//! yet consumed, and each value is received by exactly one `wait` call.
//! `wait` is cancel safe: a value is only taken when it is returned.

use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Waiter<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Waiter<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store `value` and wake the current or next waiter. Never blocks.
    pub fn wake(&self, value: T) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(value);
        }
        self.notify.notify_one();
    }

    /// Wait until a value is available and take it.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.take() {
                return value;
            }
            notified.await;
        }
    }

    /// Take the pending value, if any, without waiting.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_wake_before_wait() {
        let waiter = Waiter::new();
        waiter.wake(7);
        assert_eq!(waiter.wait().await, 7);
        assert!(!waiter.is_pending());
    }

    #[tokio::test]
    async fn test_wake_replaces_pending_value() {
        let waiter = Waiter::new();
        waiter.wake(1);
        waiter.wake(2);
        assert_eq!(waiter.wait().await, 2);
        assert_eq!(waiter.take(), None);
    }

    #[tokio::test]
    async fn test_wait_then_wake_from_other_task() {
        let waiter = Arc::new(Waiter::new());
        let task = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.wait().await })
        };
        tokio::task::yield_now().await;
        waiter.wake("go");
        assert_eq!(task.await.unwrap(), "go");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_keeps_later_value() {
        let waiter: Waiter<u32> = Waiter::new();
        let timed_out = tokio::time::timeout(Duration::from_millis(10), waiter.wait()).await;
        assert!(timed_out.is_err());

        waiter.wake(3);
        assert_eq!(waiter.wait().await, 3);
    }
}
