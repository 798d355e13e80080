//! Store relay and registry behaviour across the store/live boundary.

mod common;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::{Value, json};
use tide_core::Document;
use tidegrid_live::*;
use tidegrid_state::LocalStore;

fn relayed_store(registry: &Arc<LiveTableRegistry>) -> LocalStore {
    let store = LocalStore::open_in_memory().unwrap();
    store.add_observer(Arc::new(StoreRelay::new(registry.clone())));
    store
}

async fn open_on(
    registry: &Arc<LiveTableRegistry>,
    store: &LocalStore,
    name: &str,
) -> Arc<LiveTable<Document>> {
    let options =
        LiveTableOptions::<Document>::new(Arc::new(store.clone()), ScriptedRemote::new());
    let table = LiveTable::open(registry, name, options).unwrap();
    tokio::time::timeout(WAIT, table.wait_for_loading())
        .await
        .unwrap();
    table
}

#[tokio::test]
async fn local_writes_flow_into_the_mirror() {
    let registry = Arc::new(LiveTableRegistry::new());
    let store = relayed_store(&registry);
    store.upsert("todo", &[json!({ "id": "seed" })]).unwrap();

    let table = open_on(&registry, &store, "todo").await;
    assert_eq!(table.items().ids(), vec!["seed"]);
    let changes = record_changes(&table);

    store
        .upsert("todo", &[json!({ "id": "a", "title": "x" }), json!({ "id": "b" })])
        .unwrap();
    assert_eq!(table.items().ids(), vec!["seed", "a", "b"]);

    store
        .upsert("todo", &[json!({ "id": "a", "title": "y" })])
        .unwrap();
    assert_eq!(
        table.items().first_matching("a").unwrap().get("title"),
        Some(&json!("y"))
    );

    store.delete("todo", &["seed".to_string(), "nope".to_string()]).unwrap();
    assert_eq!(table.items().ids(), vec!["a", "b"]);

    let kinds: Vec<_> = changes.lock().iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec!["added", "replaced", "removed"]);
}

#[tokio::test]
async fn unmirrored_tables_are_ignored() {
    let registry = Arc::new(LiveTableRegistry::new());
    let store = relayed_store(&registry);
    let table = open_on(&registry, &store, "todo").await;

    store.upsert("other", &[json!({ "id": "1" })]).unwrap();
    store.delete("other", &["1".to_string()]).unwrap();

    assert!(table.is_empty());
    assert!(!registry.contains("other"));
}

#[tokio::test]
async fn bad_rows_fail_the_mirror_not_the_store() {
    let registry = Arc::new(LiveTableRegistry::new());
    let store = relayed_store(&registry);
    let table = open_on(&registry, &store, "todo").await;

    // `deleted` must be a bool for Document; the store accepts any JSON.
    let rows = vec![json!({ "id": "ok" }), json!({ "id": "bad", "deleted": "yes" })];
    store.upsert("todo", &rows).unwrap();

    assert_eq!(store.read_all("todo").unwrap().len(), 2);
    assert!(table.is_empty());
}

struct Panicky;

impl LiveCollection for Panicky {
    fn table_name(&self) -> &str {
        "panicky"
    }

    fn process_values(&self, _records: &[Value]) -> LiveResult<ReconcileSummary> {
        panic!("reconcile exploded");
    }

    fn remove_by_ids(&self, _ids: &[String]) -> usize {
        panic!("remove exploded");
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[test]
fn panics_in_reconciliation_are_contained() {
    let registry = Arc::new(LiveTableRegistry::new());
    registry.get_or_create("panicky", || -> Arc<dyn LiveCollection> { Arc::new(Panicky) });
    let store = relayed_store(&registry);

    store.upsert("panicky", &[json!({ "id": "1" })]).unwrap();
    assert_eq!(store.delete("panicky", &["1".to_string()]).unwrap(), 1);
}

#[tokio::test]
async fn reopening_returns_the_same_instance() {
    let registry = Arc::new(LiveTableRegistry::new());
    let store = relayed_store(&registry);
    let first = open_on(&registry, &store, "todo").await;
    let second = open_on(&registry, &store, "todo").await;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Other {
    id: String,
}

impl tide_core::SyncRecord for Other {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        false
    }

    fn update_from(&mut self, _newer: &Self) {}
}

struct OtherRemote;

#[async_trait::async_trait]
impl RemotePull<Other> for OtherRemote {
    async fn pull(&self, _ctx: PullContext<'_, Other>) -> Result<(), SourceError> {
        Ok(())
    }
}

#[tokio::test]
async fn reopening_with_another_record_type_is_rejected() {
    let registry = Arc::new(LiveTableRegistry::new());
    let store = relayed_store(&registry);
    open_on(&registry, &store, "todo").await;

    let options =
        LiveTableOptions::<Other>::new(Arc::new(store.clone()), Arc::new(OtherRemote));
    let result = LiveTable::open(&registry, "todo", options);
    assert!(matches!(result, Err(LiveError::TypeMismatch { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_first_opens_share_one_table() {
    let registry = Arc::new(LiveTableRegistry::new());
    let store = relayed_store(&registry);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let (registry, store) = (registry.clone(), store.clone());
            tokio::spawn(async move {
                let options =
                    LiveTableOptions::<Document>::new(Arc::new(store), ScriptedRemote::new());
                LiveTable::open(&registry, "race", options).unwrap()
            })
        })
        .collect();

    let mut tables = Vec::new();
    for task in tasks {
        tables.push(task.await.unwrap());
    }
    assert!(tables.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn global_registry_reset_starts_over() {
    let store = LocalStore::open_in_memory().unwrap();
    store.add_observer(Arc::new(StoreRelay::global()));

    let options =
        LiveTableOptions::<Document>::new(Arc::new(store.clone()), ScriptedRemote::new());
    let first = LiveTable::open_global("relay_global_reset", options).unwrap();
    first.wait_for_loading().await;
    store.upsert("relay_global_reset", &[json!({ "id": "1" })]).unwrap();
    assert_eq!(first.len(), 1);

    LiveTableRegistry::global().reset();
    assert!(!LiveTableRegistry::global().contains("relay_global_reset"));

    // The detached table no longer receives store writes.
    store.upsert("relay_global_reset", &[json!({ "id": "2" })]).unwrap();
    assert_eq!(first.len(), 1);

    let options =
        LiveTableOptions::<Document>::new(Arc::new(store.clone()), ScriptedRemote::new());
    let second = LiveTable::open_global("relay_global_reset", options).unwrap();
    tokio::time::timeout(Duration::from_secs(5), second.wait_for_loading())
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.len(), 2);
}
