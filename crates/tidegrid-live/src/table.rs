//! The per-table reconciliation engine.
//!
//! A live table owns the in-memory mirror of one table. On creation it loads
//! every persisted row in the background and then flips from
//! [`LoadState::Loading`] to [`LoadState::Ready`]. Afterwards it:
//!
//! - reconciles batches reported by the local store (through the
//!   [`StoreRelay`](crate::StoreRelay)) into minimal insert/update/remove
//!   changes;
//! - queues remote pulls by query identity and runs them one at a time, in
//!   FIFO order, once the table is ready and online;
//! - reports pulling activity only when the aggregate count crosses zero.
//!
//! Table-level notifications go through the configured
//! [`Dispatcher`](crate::Dispatcher).

use std::any::Any;
use std::cell::Cell;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tide_core::config::SyncConfig;
use tide_core::{QueryRequest, RecordId, SyncRecord};
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collection::{CollectionChange, LiveVec};
use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::{LiveError, LiveResult, SourceError};
use crate::registry::LiveTableRegistry;
use crate::source::{PullContext, RemotePull, TableReader};

const MAX_LOAD_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_LOAD_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
}

/// Result of [`LiveTable::request_pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The caller's own request ran to completion.
    Completed,
    /// A request with the same identity was already queued.
    Duplicate,
    /// Queued behind an in-flight pull, the initial load, or connectivity.
    Deferred,
}

/// Counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    /// Soft-deleted records for ids the mirror never held.
    pub discarded: usize,
}

impl ReconcileSummary {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.removed > 0
    }
}

/// Type-erased view of a live table, as held by the registry and used by
/// the store relay.
pub trait LiveCollection: Send + Sync + 'static {
    fn table_name(&self) -> &str;

    /// Reconcile a batch of store-shaped rows. Either every row converts and
    /// the batch is applied, or nothing changes.
    fn process_values(&self, records: &[Value]) -> LiveResult<ReconcileSummary>;

    /// Drop the given ids from the mirror. Returns how many were present.
    fn remove_by_ids(&self, ids: &[String]) -> usize;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

// ── Options ────────────────────────────────────────────────────────

pub struct LiveTableOptions<T> {
    pub reader: Arc<dyn TableReader>,
    pub remote: Arc<dyn RemotePull<T>>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub connectivity: Option<watch::Receiver<bool>>,
    pub push_other_tables_first: bool,
    pub load_attempts: u32,
    pub load_backoff: Duration,
}

impl<T> LiveTableOptions<T> {
    pub fn new(reader: Arc<dyn TableReader>, remote: Arc<dyn RemotePull<T>>) -> Self {
        Self {
            reader,
            remote,
            dispatcher: Arc::new(InlineDispatcher),
            connectivity: None,
            push_other_tables_first: true,
            load_attempts: 1,
            load_backoff: DEFAULT_LOAD_BACKOFF,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_connectivity(mut self, online: watch::Receiver<bool>) -> Self {
        self.connectivity = Some(online);
        self
    }

    pub fn with_load_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.load_attempts = attempts.max(1);
        self.load_backoff = backoff;
        self
    }

    pub fn with_sync_config(mut self, sync: &SyncConfig) -> Self {
        self.push_other_tables_first = sync.push_other_tables_first();
        self.load_attempts = sync.load_attempts();
        self.load_backoff = sync.load_backoff();
        self
    }
}

// ── Pulling counter ────────────────────────────────────────────────

/// The count and the boundary notification change under one lock, so
/// notifications are dispatched in the order the count crossed zero. The
/// lock is reentrant because an inline dispatcher runs listeners while it is
/// held, and a listener may itself mark the table as pulling.
struct PullCounter {
    count: ReentrantMutex<Cell<usize>>,
    changed: Arc<EventEmitter<bool>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl PullCounter {
    fn enter(self: &Arc<Self>) -> PullingGuard {
        let count = self.count.lock();
        count.set(count.get() + 1);
        if count.get() == 1 {
            self.notify(true);
        }
        PullingGuard {
            counter: Arc::clone(self),
        }
    }

    fn leave(&self) {
        let count = self.count.lock();
        count.set(count.get().saturating_sub(1));
        if count.get() == 0 {
            self.notify(false);
        }
    }

    fn active(&self) -> bool {
        self.count.lock().get() > 0
    }

    fn notify(&self, pulling: bool) {
        let changed = Arc::clone(&self.changed);
        self.dispatcher
            .dispatch(Box::new(move || changed.emit(&pulling)));
    }
}

/// Keeps the owning table in the pulling state until dropped.
pub struct PullingGuard {
    counter: Arc<PullCounter>,
}

impl Drop for PullingGuard {
    fn drop(&mut self) {
        self.counter.leave();
    }
}

// ── Pull queue ─────────────────────────────────────────────────────

struct PullQueue<T> {
    pending: VecDeque<QueryRequest<T>>,
    busy: bool,
}

/// Clears the busy mark, and dequeues the running request when it came from
/// the queue, however the pull ends, including when its future is dropped.
struct InFlight<'a, T: SyncRecord> {
    table: &'a LiveTable<T>,
    queued: Option<String>,
    finished: bool,
}

impl<'a, T: SyncRecord> InFlight<'a, T> {
    fn queued(table: &'a LiveTable<T>, query: &str) -> Self {
        Self {
            table,
            queued: Some(query.to_string()),
            finished: false,
        }
    }

    fn direct(table: &'a LiveTable<T>) -> Self {
        Self {
            table,
            queued: None,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
        self.table.end_pull(self.queued.as_deref());
    }
}

impl<T: SyncRecord> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.table.end_pull(self.queued.as_deref());
            self.table.spawn_drain();
        }
    }
}

// ── LiveTable ──────────────────────────────────────────────────────

pub struct LiveTable<T: SyncRecord> {
    name: String,
    items: LiveVec<T>,
    remote: Arc<dyn RemotePull<T>>,
    dispatcher: Arc<dyn Dispatcher>,
    runtime: Handle,
    weak: Weak<LiveTable<T>>,
    push_other_tables_first: bool,
    load_state: watch::Sender<LoadState>,
    online: Option<watch::Receiver<bool>>,
    pulling: Arc<PullCounter>,
    queue: Mutex<PullQueue<T>>,
    /// Woken whenever the busy mark clears.
    idle: Notify,
    cancel: Mutex<CancellationToken>,
    /// Ids removed while the initial load was in flight. `None` once loaded.
    deleted_while_loading: Mutex<Option<HashSet<RecordId>>>,
    collection_changed: Arc<EventEmitter<CollectionChange<T>>>,
    loading_completed: Arc<EventEmitter<()>>,
    pulling_changed: Arc<EventEmitter<bool>>,
}

impl<T: SyncRecord> LiveTable<T> {
    /// Get the live table for `name` from `registry`, creating it (and
    /// starting its initial load) on first access. `options` are only used
    /// when this call creates the table.
    pub fn open(
        registry: &LiveTableRegistry,
        name: &str,
        options: LiveTableOptions<T>,
    ) -> LiveResult<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|_| LiveError::NoRuntime)?;
        let handle = registry.get_or_create(name, || {
            let table: Arc<dyn LiveCollection> = Self::create(name, options, runtime);
            table
        });
        handle
            .as_any()
            .downcast::<LiveTable<T>>()
            .map_err(|_| LiveError::TypeMismatch {
                table: name.to_string(),
            })
    }

    /// [`LiveTable::open`] against the process-wide registry.
    pub fn open_global(name: &str, options: LiveTableOptions<T>) -> LiveResult<Arc<Self>> {
        Self::open(LiveTableRegistry::global(), name, options)
    }

    fn create(name: &str, options: LiveTableOptions<T>, runtime: Handle) -> Arc<Self> {
        let LiveTableOptions {
            reader,
            remote,
            dispatcher,
            connectivity,
            push_other_tables_first,
            load_attempts,
            load_backoff,
        } = options;

        let pulling_changed = Arc::new(EventEmitter::new());
        let (load_state, _) = watch::channel(LoadState::Loading);

        let table = Arc::new_cyclic(|weak| LiveTable {
            name: name.to_string(),
            items: LiveVec::new(),
            remote,
            dispatcher: Arc::clone(&dispatcher),
            runtime: runtime.clone(),
            weak: weak.clone(),
            push_other_tables_first,
            load_state,
            online: connectivity.clone(),
            pulling: Arc::new(PullCounter {
                count: ReentrantMutex::new(Cell::new(0)),
                changed: Arc::clone(&pulling_changed),
                dispatcher: Arc::clone(&dispatcher),
            }),
            queue: Mutex::new(PullQueue {
                pending: VecDeque::new(),
                busy: false,
            }),
            idle: Notify::new(),
            cancel: Mutex::new(CancellationToken::new()),
            deleted_while_loading: Mutex::new(Some(HashSet::new())),
            collection_changed: Arc::new(EventEmitter::new()),
            loading_completed: Arc::new(EventEmitter::new()),
            pulling_changed,
        });

        // Re-deliver collection changes through the dispatcher.
        {
            let emitter = Arc::clone(&table.collection_changed);
            let dispatcher = Arc::clone(&dispatcher);
            table.items.on_change(move |change| {
                if emitter.is_empty() {
                    return;
                }
                let emitter = Arc::clone(&emitter);
                let change = change.clone();
                dispatcher.dispatch(Box::new(move || emitter.emit(&change)));
            });
        }

        debug!(table = %name, "live table created");
        runtime.spawn(initial_load(
            Arc::downgrade(&table),
            name.to_string(),
            reader,
            load_attempts.max(1),
            load_backoff,
        ));
        if let Some(online) = connectivity {
            runtime.spawn(watch_connectivity(Arc::downgrade(&table), online));
        }
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mirrored collection. Reads only; mutation goes through the table.
    pub fn items(&self) -> &LiveVec<T> {
        &self.items
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.snapshot()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // ── Load state ─────────────────────────────────────────────────

    pub fn load_state(&self) -> LoadState {
        *self.load_state.borrow()
    }

    pub fn is_loading(&self) -> bool {
        self.load_state() == LoadState::Loading
    }

    /// Resolve once the initial load has completed. Returns immediately if
    /// it already has. Never triggers a load.
    pub async fn wait_for_loading(&self) {
        let mut rx = self.load_state.subscribe();
        let _ = rx.wait_for(|state| *state == LoadState::Ready).await;
    }

    /// Rows read by the load may have been deleted, or already upserted,
    /// through the store while the read was in flight. Deleted ids are
    /// dropped and present ids are kept as they are.
    fn complete_load(&self, rows: &[Value]) -> LiveResult<usize> {
        let records = self.convert(rows)?;
        let changes = self.items.batch(|b| {
            let deleted = self
                .deleted_while_loading
                .lock()
                .take()
                .unwrap_or_default();
            for record in records {
                if !record.is_deleted() && !deleted.contains(record.id()) {
                    b.insert(record);
                }
            }
        });
        let count: usize = changes.iter().map(CollectionChange::len).sum();

        let flipped = self.load_state.send_if_modified(|state| {
            let was_loading = *state == LoadState::Loading;
            *state = LoadState::Ready;
            was_loading
        });
        if flipped {
            info!(table = %self.name, count, "live table loaded");
            let emitter = Arc::clone(&self.loading_completed);
            self.dispatcher.dispatch(Box::new(move || emitter.emit(&())));
            self.spawn_drain();
        }
        Ok(count)
    }

    // ── Observers ──────────────────────────────────────────────────

    pub fn on_collection_changed(
        &self,
        callback: impl Fn(&CollectionChange<T>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.collection_changed.on(callback)
    }

    pub fn off_collection_changed(&self, id: ListenerId) {
        self.collection_changed.off(id);
    }

    pub fn on_loading_completed(&self, callback: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.loading_completed.on(move |_| callback())
    }

    pub fn off_loading_completed(&self, id: ListenerId) {
        self.loading_completed.off(id);
    }

    pub fn on_pulling_changed(
        &self,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> ListenerId {
        self.pulling_changed.on(move |pulling| callback(*pulling))
    }

    pub fn off_pulling_changed(&self, id: ListenerId) {
        self.pulling_changed.off(id);
    }

    // ── Reconciliation ─────────────────────────────────────────────

    fn convert(&self, rows: &[Value]) -> LiveResult<Vec<T>> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                T::deserialize(row).map_err(|source| LiveError::Conversion {
                    table: self.name.clone(),
                    index,
                    source,
                })
            })
            .collect()
    }

    /// Diff a server-sourced batch against the mirror by id and apply it as
    /// one atomic batch. Known ids are updated in place or removed when
    /// soft-deleted; unknown ids are appended unless soft-deleted. When an
    /// id repeats, its last occurrence wins.
    pub fn process_records(&self, records: impl IntoIterator<Item = T>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let changes = self.items.batch(|b| {
            let mut loading_deletes = self.deleted_while_loading.lock();
            for record in records {
                let id = record.id().to_string();
                if record.is_deleted() {
                    if let Some(deleted) = loading_deletes.as_mut() {
                        deleted.insert(id.clone());
                    }
                }
                if b.contains(&id) {
                    if record.is_deleted() {
                        b.remove(&id);
                    } else {
                        b.replace(record);
                    }
                } else if record.is_deleted() {
                    b.remove(&id);
                    summary.discarded += 1;
                } else {
                    b.insert(record);
                }
            }
        });
        for change in &changes {
            match change {
                CollectionChange::Added { items, .. } => summary.inserted = items.len(),
                CollectionChange::Removed { items } => summary.removed = items.len(),
                CollectionChange::Replaced { items } => summary.updated = items.len(),
            }
        }
        debug!(
            table = %self.name,
            inserted = summary.inserted,
            updated = summary.updated,
            removed = summary.removed,
            discarded = summary.discarded,
            "batch reconciled"
        );
        summary
    }

    /// Remove mirrored records by id. Unknown ids are ignored.
    pub fn remove_records_by_identity<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        let changes = self.items.batch(|b| {
            let mut loading_deletes = self.deleted_while_loading.lock();
            for id in ids {
                if let Some(deleted) = loading_deletes.as_mut() {
                    deleted.insert(id.as_ref().to_string());
                }
                b.remove(id.as_ref());
            }
        });
        let removed: usize = changes.iter().map(CollectionChange::len).sum();
        if removed > 0 {
            debug!(table = %self.name, removed, "records removed by identity");
        }
        removed
    }

    // ── Pulling ────────────────────────────────────────────────────

    pub fn is_pulling(&self) -> bool {
        self.pulling.active()
    }

    /// Report this table as pulling until the guard is dropped.
    pub fn mark_pulling(&self) -> PullingGuard {
        self.pulling.enter()
    }

    /// True while a queued pull is executing.
    pub fn is_busy(&self) -> bool {
        self.queue.lock().busy
    }

    /// Identities of queued requests, head first. Includes the one running.
    pub fn pending_queries(&self) -> Vec<String> {
        self.queue
            .lock()
            .pending
            .iter()
            .map(|r| r.id().to_string())
            .collect()
    }

    /// Cancel the pull in flight, if any. Later pulls get a fresh token.
    pub fn cancel_in_flight(&self) {
        let previous = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        previous.cancel();
        debug!(table = %self.name, "in-flight pull cancelled");
    }

    /// Queue a pull and drain the queue.
    ///
    /// Returns once this caller's own request has run, or as soon as the
    /// queue is blocked (another pull in flight, still loading, offline).
    /// Requests ahead of it run first. Errors from those earlier requests
    /// are logged, not returned; this request's own error is returned.
    pub async fn request_pull(&self, request: QueryRequest<T>) -> LiveResult<PullOutcome> {
        let query = request.id().to_string();
        {
            let mut queue = self.queue.lock();
            if queue.pending.iter().any(|p| p.is_duplicate_of(&request)) {
                debug!(table = %self.name, %query, "duplicate pull ignored");
                return Ok(PullOutcome::Duplicate);
            }
            queue.pending.push_back(request);
        }
        debug!(table = %self.name, %query, "pull queued");

        while let Some(next) = self.begin_pull() {
            let in_flight = InFlight::queued(self, next.id());
            let result = self.execute(&next).await;
            in_flight.finish();

            if next.id() == query {
                self.spawn_drain();
                return result.map(|()| PullOutcome::Completed);
            }
            if let Err(e) = result {
                warn!(table = %self.name, query = %next.id(), error = %e, "queued pull failed");
            }
        }
        debug!(table = %self.name, %query, "pull deferred");
        Ok(PullOutcome::Deferred)
    }

    /// Pull outside the queue, without dedup. Waits for any pull in flight
    /// to finish first, then holds the busy mark, so it never overlaps a
    /// queued pull. Counts toward the pulling state.
    pub async fn pull_now(&self, request: &QueryRequest<T>) -> LiveResult<()> {
        self.claim_busy().await;
        let in_flight = InFlight::direct(self);
        let result = self.execute(request).await;
        in_flight.finish();
        self.spawn_drain();
        result
    }

    async fn claim_busy(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            {
                let mut queue = self.queue.lock();
                if !queue.busy {
                    queue.busy = true;
                    return;
                }
            }
            idle.await;
        }
    }

    /// One critical section: check readiness, connectivity and the busy
    /// mark, then claim the head of the queue.
    fn begin_pull(&self) -> Option<QueryRequest<T>> {
        if self.is_loading() || !self.is_online() {
            return None;
        }
        let mut queue = self.queue.lock();
        if queue.busy {
            return None;
        }
        let head = queue.pending.front()?.clone();
        queue.busy = true;
        Some(head)
    }

    fn end_pull(&self, queued: Option<&str>) {
        {
            let mut queue = self.queue.lock();
            if let Some(query) = queued {
                if let Some(pos) = queue.pending.iter().position(|r| r.id() == query) {
                    queue.pending.remove(pos);
                }
            }
            queue.busy = false;
        }
        self.idle.notify_waiters();
    }

    fn is_online(&self) -> bool {
        self.online.as_ref().is_none_or(|rx| *rx.borrow())
    }

    async fn execute(&self, request: &QueryRequest<T>) -> LiveResult<()> {
        let _pulling = self.mark_pulling();
        let cancel = self.cancel.lock().clone();
        let ctx = PullContext {
            table: &self.name,
            request,
            push_other_tables_first: self.push_other_tables_first,
            cancel: cancel.clone(),
        };
        debug!(table = %self.name, query = %request.id(), "pull started");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::cancelled()),
            result = self.remote.pull(ctx) => result,
        };

        match result {
            Ok(()) => {
                debug!(table = %self.name, query = %request.id(), "pull finished");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(LiveError::Cancelled {
                table: self.name.clone(),
                query: request.id().to_string(),
            }),
            Err(source) => Err(LiveError::Pull {
                table: self.name.clone(),
                query: request.id().to_string(),
                source,
            }),
        }
    }

    /// Run queued pulls until the queue is empty or blocked.
    async fn drain(&self) {
        while let Some(next) = self.begin_pull() {
            let in_flight = InFlight::queued(self, next.id());
            let result = self.execute(&next).await;
            in_flight.finish();
            if let Err(e) = result {
                warn!(table = %self.name, query = %next.id(), error = %e, "background pull failed");
            }
        }
    }

    fn spawn_drain(&self) {
        if self.queue.lock().pending.is_empty() {
            return;
        }
        let Some(table) = self.weak.upgrade() else {
            return;
        };
        self.runtime.spawn(async move { table.drain().await });
    }
}

impl<T: SyncRecord> LiveCollection for LiveTable<T> {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn process_values(&self, records: &[Value]) -> LiveResult<ReconcileSummary> {
        let records = self.convert(records)?;
        Ok(self.process_records(records))
    }

    fn remove_by_ids(&self, ids: &[String]) -> usize {
        self.remove_records_by_identity(ids)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ── Background tasks ───────────────────────────────────────────────

async fn initial_load<T: SyncRecord>(
    table: Weak<LiveTable<T>>,
    name: String,
    reader: Arc<dyn TableReader>,
    attempts: u32,
    backoff: Duration,
) {
    let mut delay = backoff;
    for attempt in 1..=attempts {
        let outcome = match reader.read_all(&name).await {
            Ok(rows) => {
                let Some(table) = table.upgrade() else {
                    return;
                };
                table.complete_load(&rows).map(|_| ())
            }
            Err(source) => Err(LiveError::Pull {
                table: name.clone(),
                query: "initial load".to_string(),
                source,
            }),
        };
        match outcome {
            Ok(()) => return,
            Err(e) if attempt < attempts => {
                warn!(table = %name, attempt, error = %e, "initial load failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_LOAD_BACKOFF);
            }
            Err(e) => {
                error!(table = %name, attempts, error = %e, "initial load failed, table stays loading");
            }
        }
    }
}

async fn watch_connectivity<T: SyncRecord>(
    table: Weak<LiveTable<T>>,
    mut online: watch::Receiver<bool>,
) {
    let mut was_online = *online.borrow_and_update();
    while online.changed().await.is_ok() {
        let now_online = *online.borrow_and_update();
        let Some(live) = table.upgrade() else {
            break;
        };
        if now_online && !was_online {
            debug!(table = %live.name, "back online, draining pulls");
            live.drain().await;
        }
        was_online = now_online;
    }
}
