//! redb-backed persistence for synced tables.
//!
//! Rows are JSON objects carrying a string `id`. Batch upserts and deletes
//! each run in one write transaction; registered observers are invoked only
//! after that transaction commits, and always in commit order. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::{Arc, RwLock};

use parking_lot::Mutex;

use redb::{Database, ReadableDatabase, ReadableTable, TableError, TableHandle};
use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::observer::StoreObserver;
use crate::outbox::Outbox;
use crate::tables::{record_table, validate_table_name};

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// A committed batch, waiting to be handed to observers.
enum Committed {
    Upsert { table: String, records: Vec<Value> },
    Delete { table: String, ids: Vec<String> },
}

/// Thread-safe local table store backed by redb.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
    observers: Arc<RwLock<Vec<Arc<dyn StoreObserver>>>>,
    /// Held from `begin_write` until the batch is queued for observers.
    commit_order: Arc<Mutex<()>>,
    committed: Arc<Outbox<Committed>>,
}

impl LocalStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        debug!(?path, "local store opened");
        Ok(Self::from_database(db))
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        debug!("in-memory local store opened");
        Ok(Self::from_database(db))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            observers: Arc::new(RwLock::new(Vec::new())),
            commit_order: Arc::new(Mutex::new(())),
            committed: Arc::new(Outbox::new()),
        }
    }

    /// Register a hook that runs after every committed batch write.
    pub fn add_observer(&self, observer: Arc<dyn StoreObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert or replace a batch of rows in one transaction.
    ///
    /// Every row must be a JSON object with a string `id`; a row without one
    /// fails the whole batch before anything is written.
    pub fn upsert(&self, table: &str, records: &[Value]) -> StoreResult<()> {
        validate_table_name(table)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::MissingId {
                    table: table.to_string(),
                    index,
                })?;
            let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
            rows.push((id, value));
        }

        {
            let _order = self.commit_order.lock();
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            {
                let mut t = txn.open_table(record_table(table)).map_err(map_err!(Table))?;
                for (id, value) in &rows {
                    t.insert(*id, value.as_slice()).map_err(map_err!(Write))?;
                }
            }
            txn.commit().map_err(map_err!(Transaction))?;
            self.committed.push(Committed::Upsert {
                table: table.to_string(),
                records: records.to_vec(),
            });
        }
        debug!(%table, count = rows.len(), "records upserted");

        self.notify_observers();
        Ok(())
    }

    /// Delete rows by id in one transaction. Returns how many existed.
    pub fn delete(&self, table: &str, ids: &[String]) -> StoreResult<usize> {
        validate_table_name(table)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let removed = {
            let _order = self.commit_order.lock();
            let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
            let mut removed = Vec::new();
            {
                let mut t = txn.open_table(record_table(table)).map_err(map_err!(Table))?;
                for id in ids {
                    if t.remove(id.as_str()).map_err(map_err!(Write))?.is_some() {
                        removed.push(id.clone());
                    }
                }
            }
            txn.commit().map_err(map_err!(Transaction))?;
            let count = removed.len();
            if count > 0 {
                self.committed.push(Committed::Delete {
                    table: table.to_string(),
                    ids: removed,
                });
            }
            count
        };
        debug!(%table, requested = ids.len(), removed, "records deleted");

        self.notify_observers();
        Ok(removed)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Read every row of a table in key order. A table that was never
    /// written reads as empty.
    pub fn read_all(&self, table: &str) -> StoreResult<Vec<Value>> {
        validate_table_name(table)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = match txn.open_table(record_table(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Table(e.to_string())),
        };
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: Value =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    /// Get one row by id.
    pub fn get(&self, table: &str, id: &str) -> StoreResult<Option<Value>> {
        validate_table_name(table)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = match txn.open_table(record_table(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(StoreError::Table(e.to_string())),
        };
        match t.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: Value =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Names of every table that has been written at least once.
    pub fn table_names(&self) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let names = txn
            .list_tables()
            .map_err(map_err!(Table))?
            .map(|handle| handle.name().to_string())
            .collect();
        Ok(names)
    }

    /// Hand committed batches to observers in commit order. If another
    /// writer is already delivering, it delivers ours too and this returns
    /// immediately.
    fn notify_observers(&self) {
        self.committed.flush(|batch| {
            for observer in self.observers_snapshot() {
                match &batch {
                    Committed::Upsert { table, records } => observer.after_upsert(table, records),
                    Committed::Delete { table, ids } => observer.after_delete(table, ids),
                }
            }
        });
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn StoreObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingObserver {
        upserts: Mutex<Vec<(String, Vec<Value>)>>,
        deletes: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl StoreObserver for RecordingObserver {
        fn after_upsert(&self, table: &str, records: &[Value]) {
            self.upserts.lock().push((table.to_string(), records.to_vec()));
        }

        fn after_delete(&self, table: &str, ids: &[String]) {
            self.deletes.lock().push((table.to_string(), ids.to_vec()));
        }
    }

    fn todo(id: &str, title: &str) -> Value {
        json!({ "id": id, "title": title, "deleted": false })
    }

    // ── Upsert / read ──────────────────────────────────────────────

    #[test]
    fn upsert_and_get() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert("todo", &[todo("1", "milk")]).unwrap();

        let row = store.get("todo", "1").unwrap().unwrap();
        assert_eq!(row["title"], json!("milk"));
        assert!(store.get("todo", "2").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert("todo", &[todo("1", "milk")]).unwrap();
        store.upsert("todo", &[todo("1", "oat milk")]).unwrap();

        let all = store.read_all("todo").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["title"], json!("oat milk"));
    }

    #[test]
    fn read_all_returns_rows_in_key_order() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert("todo", &[todo("b", "2"), todo("a", "1"), todo("c", "3")])
            .unwrap();

        let ids: Vec<_> = store
            .read_all("todo")
            .unwrap()
            .iter()
            .map(|v| v["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_table_reads_empty() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(store.read_all("never_written").unwrap().is_empty());
        assert!(store.get("never_written", "x").unwrap().is_none());
    }

    #[test]
    fn row_without_id_fails_whole_batch() {
        let store = LocalStore::open_in_memory().unwrap();
        let err = store
            .upsert("todo", &[todo("1", "ok"), json!({ "title": "no id" })])
            .unwrap_err();

        assert!(matches!(err, StoreError::MissingId { index: 1, .. }));
        assert!(store.read_all("todo").unwrap().is_empty());
    }

    #[test]
    fn invalid_table_name_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(matches!(
            store.upsert("", &[todo("1", "x")]),
            Err(StoreError::InvalidTable(_))
        ));
    }

    #[test]
    fn table_names_lists_written_tables() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert("a", &[todo("1", "x")]).unwrap();
        store.upsert("b", &[todo("1", "x")]).unwrap();

        let mut names = store.table_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    // ── Delete ─────────────────────────────────────────────────────

    #[test]
    fn delete_reports_existing_rows_only() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert("todo", &[todo("1", "a"), todo("2", "b")]).unwrap();

        let removed = store
            .delete("todo", &["1".to_string(), "9".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.read_all("todo").unwrap().len(), 1);
    }

    // ── Observers ──────────────────────────────────────────────────

    #[test]
    fn observers_see_committed_batches() {
        let store = LocalStore::open_in_memory().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        store.add_observer(observer.clone());
        assert_eq!(store.observer_count(), 1);

        store.upsert("todo", &[todo("1", "a"), todo("2", "b")]).unwrap();
        store
            .delete("todo", &["2".to_string(), "missing".to_string()])
            .unwrap();

        let upserts = observer.upserts.lock();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, "todo");
        assert_eq!(upserts[0].1.len(), 2);

        let deletes = observer.deletes.lock();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].1, vec!["2".to_string()]);
    }

    #[test]
    fn observers_skip_failed_and_empty_writes() {
        let store = LocalStore::open_in_memory().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        store.add_observer(observer.clone());

        let _ = store.upsert("todo", &[json!({ "no": "id" })]);
        store.upsert("todo", &[]).unwrap();
        store.delete("todo", &["nothing".to_string()]).unwrap();

        assert!(observer.upserts.lock().is_empty());
        assert!(observer.deletes.lock().is_empty());
    }

    /// Blocks delivery of the first batch whose row has `v == 1`.
    struct GateObserver {
        entered: Mutex<std::sync::mpsc::Sender<()>>,
        go: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl StoreObserver for GateObserver {
        fn after_upsert(&self, _table: &str, records: &[Value]) {
            if records[0]["v"] == json!(1) {
                self.entered.lock().send(()).unwrap();
                self.go.lock().recv().unwrap();
            }
        }

        fn after_delete(&self, _table: &str, _ids: &[String]) {}
    }

    #[test]
    fn observers_receive_batches_in_commit_order() {
        let store = LocalStore::open_in_memory().unwrap();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (go_tx, go_rx) = std::sync::mpsc::channel();
        store.add_observer(Arc::new(GateObserver {
            entered: Mutex::new(entered_tx),
            go: Mutex::new(go_rx),
        }));
        let recorder = Arc::new(RecordingObserver::default());
        store.add_observer(recorder.clone());

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                store.upsert("todo", &[json!({ "id": "1", "v": 1 })]).unwrap();
            })
        };
        entered_rx.recv().unwrap();

        // Commits while v1 is still being delivered; its delivery queues
        // behind v1 instead of overtaking it.
        store.upsert("todo", &[json!({ "id": "1", "v": 2 })]).unwrap();
        store.delete("todo", &["1".to_string()]).unwrap();
        assert!(recorder.upserts.lock().is_empty());

        go_tx.send(()).unwrap();
        writer.join().unwrap();

        let versions: Vec<_> = recorder
            .upserts
            .lock()
            .iter()
            .map(|(_, rows)| rows[0]["v"].clone())
            .collect();
        assert_eq!(versions, vec![json!(1), json!(2)]);
        assert_eq!(recorder.deletes.lock().len(), 1);
        assert!(store.get("todo", "1").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("mirror.redb");

        {
            let store = LocalStore::open(&db_path).unwrap();
            store.upsert("todo", &[todo("1", "persisted")]).unwrap();
        }

        let store = LocalStore::open(&db_path).unwrap();
        let row = store.get("todo", "1").unwrap();
        assert_eq!(row.unwrap()["title"], json!("persisted"));
    }
}
