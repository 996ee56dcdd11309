//! SQLite-backed operation store for persistence across restarts.
//!
//! Rows are ordered by an integer `position` column. Appends take
//! `MAX(position) + 1`; indexed inserts shift later rows inside a transaction.
//! `load_operations` reads the table into a cache that `list` decodes from.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::backend::{OperationStore, StoreError, StoreResult, StoredOperation};
use crate::operation::{Operation, OperationRegistry};

/// SQLite operation store.
#[derive(Clone)]
pub struct SqliteOperationStore {
    db_path: PathBuf,
    registry: OperationRegistry,
    loaded: Arc<Mutex<Vec<StoredOperation>>>,
}

impl SqliteOperationStore {
    /// Open (creating if needed) a store at `db_path`.
    pub fn new(db_path: &Path, registry: OperationRegistry) -> StoreResult<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
            registry,
            loaded: Arc::new(Mutex::new(Vec::new())),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                position INTEGER NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_operations_position ON operations(position);
            "#,
        )?;
        Ok(())
    }

    /// Raw rows in stored order, straight from the database.
    pub fn records(&self) -> StoreResult<Vec<StoredOperation>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, position, data, created_at FROM operations ORDER BY position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, name, position, data, created_at) in rows {
            match serde_json::from_str(&data) {
                Ok(data) => records.push(StoredOperation {
                    id,
                    name,
                    position,
                    data,
                    created_at,
                }),
                Err(e) => warn!(operation_id = %id, "Skipping unreadable operation row: {}", e),
            }
        }
        Ok(records)
    }

    /// Number of persisted rows.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Delete every persisted row. Returns the number removed.
    pub fn clear(&self) -> StoreResult<u64> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM operations", [])?;
        if let Ok(mut loaded) = self.loaded.lock() {
            loaded.clear();
        }
        Ok(removed as u64)
    }

    fn insert_at(&self, index: Option<usize>, record: StoredOperation) -> StoreResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let position = match index {
            None => next_position(&tx)?,
            Some(index) => {
                let target: Option<i64> = tx
                    .query_row(
                        "SELECT position FROM operations ORDER BY position LIMIT 1 OFFSET ?",
                        params![index as i64],
                        |row| row.get(0),
                    )
                    .optional()?;
                match target {
                    Some(position) => {
                        tx.execute(
                            "UPDATE operations SET position = position + 1 WHERE position >= ?",
                            params![position],
                        )?;
                        position
                    }
                    None => next_position(&tx)?,
                }
            }
        };

        tx.execute(
            "INSERT OR REPLACE INTO operations (id, name, position, data, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                record.id,
                record.name,
                position,
                serde_json::to_string(&record.data)?,
                record.created_at
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn next_position(conn: &Connection) -> StoreResult<i64> {
    let max: Option<i64> =
        conn.query_row("SELECT MAX(position) FROM operations", [], |row| row.get(0))?;
    Ok(max.map_or(0, |m| m + 1))
}

impl OperationStore for SqliteOperationStore {
    fn add(&self, op: &dyn Operation) -> StoreResult<()> {
        let record = StoredOperation::from_operation(op)?;
        self.insert_at(None, record)
    }

    fn insert(&self, index: usize, op: &dyn Operation) -> StoreResult<()> {
        let record = StoredOperation::from_operation(op)?;
        self.insert_at(Some(index), record)
    }

    fn update(&self, op: &dyn Operation) -> StoreResult<()> {
        let data = serde_json::to_string(&op.to_json()?)?;
        let conn = self.connect()?;
        conn.execute(
            "UPDATE operations SET data = ? WHERE id = ?",
            params![data, op.id()],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM operations WHERE id = ?", params![id])?;
        Ok(())
    }

    fn load_operations(&self) -> StoreResult<()> {
        let records = self.records()?;
        debug!(count = records.len(), path = %self.db_path.display(), "Loaded persisted operations");
        let mut loaded = self.loaded.lock().map_err(|_| StoreError::Poisoned)?;
        *loaded = records;
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<Box<dyn Operation>>> {
        let records = self.loaded.lock().map_err(|_| StoreError::Poisoned)?.clone();
        let mut ops = Vec::with_capacity(records.len());
        for record in records {
            match self.registry.decode(&record.name, record.data) {
                Ok(mut op) => {
                    op.set_id(record.id);
                    ops.push(op);
                }
                Err(e) => warn!(
                    operation_id = %record.id,
                    name = %record.name,
                    "Skipping persisted operation: {}",
                    e
                ),
            }
        }
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::testing::{registry, TestOperation};
    use crate::operation::GroupMode;
    use tempfile::tempdir;

    fn setup_test_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        (dir, db_path)
    }

    fn op_with_id(name: &str, id: &str) -> TestOperation {
        let mut op = TestOperation::new(name);
        op.id = id.to_string();
        op
    }

    fn ids(store: &SqliteOperationStore) -> Vec<String> {
        store.records().unwrap().into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_add_and_insert_order() {
        let (_dir, db_path) = setup_test_db();
        let store = SqliteOperationStore::new(&db_path, registry()).unwrap();

        store.add(&op_with_id("track", "a")).unwrap();
        store.add(&op_with_id("track", "b")).unwrap();
        store.insert(0, &op_with_id("track", "front")).unwrap();
        store.insert(2, &op_with_id("track", "middle")).unwrap();
        store.insert(99, &op_with_id("track", "tail")).unwrap();

        assert_eq!(ids(&store), vec!["front", "a", "middle", "b", "tail"]);
    }

    #[test]
    fn test_persistence_across_instances() {
        let (_dir, db_path) = setup_test_db();

        {
            let store = SqliteOperationStore::new(&db_path, registry()).unwrap();
            let mut op = TestOperation::grouped("create-user", GroupMode::Create, "k1");
            op.id = "op-1".to_string();
            store.add(&op).unwrap();
            store.add(&op_with_id("track", "op-2")).unwrap();
        }

        let store = SqliteOperationStore::new(&db_path, registry()).unwrap();
        store.load_operations().unwrap();
        let ops = store.list().unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].id(), "op-1");
        assert_eq!(ops[0].group_mode(), GroupMode::Create);
        assert_eq!(ops[0].create_comparison_key(), "k1");
        assert_eq!(ops[1].id(), "op-2");
    }

    #[test]
    fn test_remove_deletes_row() {
        let (_dir, db_path) = setup_test_db();
        let store = SqliteOperationStore::new(&db_path, registry()).unwrap();

        store.add(&op_with_id("track", "a")).unwrap();
        store.add(&op_with_id("track", "b")).unwrap();
        store.remove("a").unwrap();
        store.remove("a").unwrap();

        assert_eq!(ids(&store), vec!["b"]);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_list_skips_unknown_operations() {
        let (_dir, db_path) = setup_test_db();
        let store = SqliteOperationStore::new(&db_path, registry()).unwrap();

        store.add(&op_with_id("track", "a")).unwrap();
        store.add(&op_with_id("retired-op", "b")).unwrap();
        store.load_operations().unwrap();

        let ops = store.list().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id(), "a");
        // The undecodable row is kept on disk.
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_update_survives_reopen() {
        let (_dir, db_path) = setup_test_db();

        {
            let store = SqliteOperationStore::new(&db_path, registry()).unwrap();
            store.add(&op_with_id("track", "a")).unwrap();
            let mut op = op_with_id("update-user", "b");
            op.record_id = Some("local-1".to_string());
            store.add(&op).unwrap();

            op.record_id = Some("remote-1".to_string());
            store.update(&op).unwrap();
        }

        let store = SqliteOperationStore::new(&db_path, registry()).unwrap();
        store.load_operations().unwrap();
        let ops = store.list().unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].id(), "b");
        assert_eq!(ops[1].apply_to_record_id(), Some("remote-1"));
    }

    #[test]
    fn test_clear() {
        let (_dir, db_path) = setup_test_db();
        let store = SqliteOperationStore::new(&db_path, registry()).unwrap();

        store.add(&op_with_id("track", "a")).unwrap();
        store.add(&op_with_id("track", "b")).unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }
}
