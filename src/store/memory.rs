//! In-memory operation store for single-process operation.
//!
//! Keeps serialized records so `list()` hands out fresh decoded operations
//! the same way a persistent backend would. Nothing survives a restart.

use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{OperationStore, StoreError, StoreResult, StoredOperation};
use crate::operation::{Operation, OperationRegistry};

/// In-memory operation store.
#[derive(Clone)]
pub struct InMemoryOperationStore {
    records: Arc<Mutex<Vec<StoredOperation>>>,
    registry: OperationRegistry,
}

impl InMemoryOperationStore {
    pub fn new(registry: OperationRegistry) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            registry,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Vec<StoredOperation>>> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Raw records in stored order.
    pub fn records(&self) -> StoreResult<Vec<StoredOperation>> {
        Ok(self.lock()?.clone())
    }

    /// Ids in stored order.
    pub fn ids(&self) -> Vec<String> {
        self.lock()
            .map(|records| records.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock()
            .map(|records| records.iter().any(|r| r.id == id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn renumber(records: &mut [StoredOperation]) {
        for (position, record) in records.iter_mut().enumerate() {
            record.position = position as i64;
        }
    }
}

impl OperationStore for InMemoryOperationStore {
    fn add(&self, op: &dyn Operation) -> StoreResult<()> {
        let record = StoredOperation::from_operation(op)?;
        let mut records = self.lock()?;
        records.push(record);
        Self::renumber(&mut records);
        Ok(())
    }

    fn insert(&self, index: usize, op: &dyn Operation) -> StoreResult<()> {
        let record = StoredOperation::from_operation(op)?;
        let mut records = self.lock()?;
        let index = index.min(records.len());
        records.insert(index, record);
        Self::renumber(&mut records);
        Ok(())
    }

    fn update(&self, op: &dyn Operation) -> StoreResult<()> {
        let data = op.to_json()?;
        let mut records = self.lock()?;
        if let Some(record) = records.iter_mut().find(|r| r.id == op.id()) {
            record.data = data;
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> StoreResult<()> {
        let mut records = self.lock()?;
        records.retain(|r| r.id != id);
        Self::renumber(&mut records);
        Ok(())
    }

    fn load_operations(&self) -> StoreResult<()> {
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<Box<dyn Operation>>> {
        let records = self.lock()?.clone();
        records
            .into_iter()
            .map(|r| {
                let mut op = self.registry.decode(&r.name, r.data)?;
                op.set_id(r.id);
                Ok(op)
            })
            .collect()
    }
}
