//! Shared fixtures for the live table integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tide_core::Document;
use tidegrid_live::*;
use tidegrid_state::LocalStore;
use tokio::sync::{Semaphore, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

/// Remote that records every pull, optionally holds chosen queries until
/// released, fails chosen queries, and writes configured rows to a store.
#[derive(Default)]
pub struct ScriptedRemote {
    executed: Mutex<Vec<String>>,
    started: Mutex<Option<mpsc::UnboundedSender<String>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    failures: Mutex<HashSet<String>>,
    writes: Mutex<Option<(LocalStore, Vec<Value>)>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Receive the id of every pull as it starts.
    pub fn started(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.started.lock() = Some(tx);
        rx
    }

    /// Hold pulls of `query` until [`ScriptedRemote::release`].
    pub fn hold(&self, query: &str) {
        self.gates
            .lock()
            .insert(query.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, query: &str) {
        if let Some(gate) = self.gates.lock().get(query) {
            gate.add_permits(1);
        }
    }

    pub fn fail(&self, query: &str) {
        self.failures.lock().insert(query.to_string());
    }

    /// Upsert `rows` into `store` on every successful pull.
    pub fn write_on_pull(&self, store: LocalStore, rows: Vec<Value>) {
        *self.writes.lock() = Some((store, rows));
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl RemotePull<Document> for ScriptedRemote {
    async fn pull(&self, ctx: PullContext<'_, Document>) -> Result<(), SourceError> {
        let query = ctx.query_id().to_string();
        self.executed.lock().push(query.clone());
        if let Some(tx) = self.started.lock().as_ref() {
            let _ = tx.send(query.clone());
        }

        let gate = self.gates.lock().get(&query).cloned();
        if let Some(gate) = gate {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(SourceError::cancelled()),
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }

        if self.failures.lock().contains(&query) {
            return Err(SourceError::transport(format!("{query} unreachable")));
        }

        let writes = self.writes.lock().clone();
        if let Some((store, rows)) = writes {
            let rows: Vec<Value> = rows
                .into_iter()
                .filter(|row| {
                    serde_json::from_value::<Document>(row.clone())
                        .map(|doc| ctx.request.matches(&doc))
                        .unwrap_or(false)
                })
                .collect();
            store.upsert(ctx.table, &rows)?;
        }
        Ok(())
    }
}

/// Reader returning fixed rows, optionally failing the first `failures`
/// attempts or holding until released.
pub struct ScriptedReader {
    rows: Vec<Value>,
    failures: Mutex<usize>,
    calls: Mutex<usize>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedReader {
    pub fn rows(rows: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            failures: Mutex::new(0),
            calls: Mutex::new(0),
            gate: None,
        })
    }

    pub fn failing(times: usize, rows: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            failures: Mutex::new(times),
            calls: Mutex::new(0),
            gate: None,
        })
    }

    pub fn held(rows: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            failures: Mutex::new(0),
            calls: Mutex::new(0),
            gate: Some(Arc::new(Semaphore::new(0))),
        })
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl TableReader for ScriptedReader {
    async fn read_all(&self, _table: &str) -> Result<Vec<Value>, SourceError> {
        *self.calls.lock() += 1;
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::transport("store offline"));
            }
        }
        Ok(self.rows.clone())
    }
}

/// Open a `Document` table on a private registry and wait for it to load.
pub async fn loaded_table(
    rows: Vec<Value>,
    remote: Arc<ScriptedRemote>,
) -> (Arc<LiveTableRegistry>, Arc<LiveTable<Document>>) {
    let registry = Arc::new(LiveTableRegistry::new());
    let options =
        LiveTableOptions::<Document>::new(ScriptedReader::rows(rows), remote);
    let table = LiveTable::open(&registry, "todo", options).unwrap();
    tokio::time::timeout(WAIT, table.wait_for_loading())
        .await
        .unwrap();
    (registry, table)
}

/// Collect every collection change fired by `table`.
pub fn record_changes(
    table: &LiveTable<Document>,
) -> Arc<Mutex<Vec<CollectionChange<Document>>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    table.on_collection_changed(move |change| sink.lock().push(change.clone()));
    log
}

pub async fn next_started(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("pull did not start in time")
        .expect("remote dropped")
}

/// Poll `check` until it holds or the wait budget runs out.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
