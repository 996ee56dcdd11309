//! Visibility tracking for records the backend created recently.
//!
//! Right after the backend assigns a permanent ID, reads against that record
//! may not see it yet. Operations referencing such a record are held back
//! until the post-create delay has passed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Answers whether an operation referencing a record may run now.
pub trait RecordVisibility: Send + Sync {
    /// `None` means the operation does not reference a record.
    fn can_access(&self, record_id: Option<&str>) -> bool;

    /// Mark a permanent ID as newly created.
    fn add(&self, record_id: &str);
}

/// Default tracker: a record is accessible when it is unknown or was created
/// longer than `post_create_delay` ago.
#[derive(Debug)]
pub struct NewRecordsState {
    records: Mutex<HashMap<String, Instant>>,
    post_create_delay: Duration,
}

impl NewRecordsState {
    pub fn new(post_create_delay: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            post_create_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordVisibility for NewRecordsState {
    fn can_access(&self, record_id: Option<&str>) -> bool {
        let Some(record_id) = record_id else {
            return true;
        };
        let Ok(records) = self.records.lock() else {
            return true;
        };
        records
            .get(record_id)
            .map_or(true, |created| created.elapsed() >= self.post_create_delay)
    }

    /// Also drops entries whose delay has already passed.
    fn add(&self, record_id: &str) {
        if let Ok(mut records) = self.records.lock() {
            let delay = self.post_create_delay;
            records.retain(|_, created| created.elapsed() < delay);
            records.insert(record_id.to_string(), Instant::now());
        }
    }
}

/// Tracker that treats every record as visible.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysVisible;

impl RecordVisibility for AlwaysVisible {
    fn can_access(&self, _record_id: Option<&str>) -> bool {
        true
    }

    fn add(&self, _record_id: &str) {}
}
