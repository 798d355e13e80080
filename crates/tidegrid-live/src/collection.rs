//! Identity-keyed ordered collection with batched, observable mutation.
//!
//! [`LiveVec`] keeps records in insertion order and indexes them by id.
//! Every mutation is a [`Batch`]: staged under the write lock, committed as
//! removals, then in-place replacements, then appends. Each non-empty
//! category produces one [`CollectionChange`], queued before the lock is
//! released and emitted after, so observers see deltas in commit order.
//! Readers never see a half-applied batch.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tide_core::{RecordId, SyncRecord};
use tidegrid_state::Outbox;

use crate::emitter::{EventEmitter, ListenerId};

/// One in-place update: the item at `index` changed from `old` to `new`.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement<T> {
    pub index: usize,
    pub old: T,
    pub new: T,
}

/// Delta produced by one category of a committed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<T> {
    /// `items` were appended starting at `start`.
    Added { start: usize, items: Vec<T> },
    /// Items removed, with their positions before the removal, ascending.
    Removed { items: Vec<(usize, T)> },
    /// Items updated in place, ascending by index.
    Replaced { items: Vec<Replacement<T>> },
}

impl<T> CollectionChange<T> {
    /// Number of items the change touches.
    pub fn len(&self) -> usize {
        match self {
            CollectionChange::Added { items, .. } => items.len(),
            CollectionChange::Removed { items } => items.len(),
            CollectionChange::Replaced { items } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CollectionChange::Added { .. } => "added",
            CollectionChange::Removed { .. } => "removed",
            CollectionChange::Replaced { .. } => "replaced",
        }
    }
}

struct Inner<T> {
    items: Vec<T>,
    index: HashMap<RecordId, usize>,
}

impl<T: SyncRecord> Inner<T> {
    fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id().to_string(), i))
            .collect();
    }

    fn apply(&mut self, ops: StagedOps<T>) -> Vec<CollectionChange<T>> {
        let mut changes = Vec::new();

        // ── Removals ──
        let mut positions: Vec<usize> = ops
            .removals
            .iter()
            .filter_map(|id| self.position(id))
            .collect();
        positions.sort_unstable();
        positions.dedup();
        if !positions.is_empty() {
            let removed: Vec<(usize, T)> = positions
                .iter()
                .map(|&i| (i, self.items[i].clone()))
                .collect();
            let doomed: HashSet<usize> = positions.into_iter().collect();
            let mut i = 0;
            self.items.retain(|_| {
                let keep = !doomed.contains(&i);
                i += 1;
                keep
            });
            self.reindex();
            changes.push(CollectionChange::Removed { items: removed });
        }

        // ── Replacements ──
        let mut replaced = Vec::new();
        for newer in ops.replacements {
            let Some(index) = self.position(newer.id()) else {
                continue;
            };
            let old = self.items[index].clone();
            let mut updated = old.clone();
            updated.update_from(&newer);
            if updated != old {
                self.items[index] = updated.clone();
                replaced.push(Replacement {
                    index,
                    old,
                    new: updated,
                });
            }
        }
        if !replaced.is_empty() {
            replaced.sort_by_key(|r| r.index);
            changes.push(CollectionChange::Replaced { items: replaced });
        }

        // ── Inserts ──
        let start = self.items.len();
        let mut added = Vec::new();
        for record in ops.inserts {
            if self.index.contains_key(record.id()) {
                continue;
            }
            self.index.insert(record.id().to_string(), self.items.len());
            self.items.push(record.clone());
            added.push(record);
        }
        if !added.is_empty() {
            changes.push(CollectionChange::Added {
                start,
                items: added,
            });
        }

        changes
    }
}

enum Staged<T> {
    Remove,
    Replace(T),
}

struct StagedOps<T> {
    removals: Vec<RecordId>,
    replacements: Vec<T>,
    inserts: Vec<T>,
}

/// Staging area handed to [`LiveVec::batch`].
///
/// Reads (`contains`, `get`, `len`) see the collection as it was when the
/// batch started. Staging the same id twice keeps the later operation at the
/// earlier one's position. The closure runs under the collection's write
/// lock and must not call back into the same [`LiveVec`].
pub struct Batch<'a, T> {
    current: &'a Inner<T>,
    existing: Vec<(RecordId, Staged<T>)>,
    existing_pos: HashMap<RecordId, usize>,
    inserts: Vec<T>,
    insert_pos: HashMap<RecordId, usize>,
}

impl<'a, T: SyncRecord> Batch<'a, T> {
    fn new(current: &'a Inner<T>) -> Self {
        Self {
            current,
            existing: Vec::new(),
            existing_pos: HashMap::new(),
            inserts: Vec::new(),
            insert_pos: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.current.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.current.position(id).map(|i| &self.current.items[i])
    }

    pub fn len(&self) -> usize {
        self.current.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.items.is_empty()
    }

    /// Stage an append. Ignored (returns false) when the id is already present.
    pub fn insert(&mut self, record: T) -> bool {
        if self.contains(record.id()) {
            return false;
        }
        match self.insert_pos.get(record.id()) {
            Some(&pos) => self.inserts[pos] = record,
            None => {
                self.insert_pos
                    .insert(record.id().to_string(), self.inserts.len());
                self.inserts.push(record);
            }
        }
        true
    }

    /// Stage an in-place update of an existing item. Returns false when the
    /// id is not present.
    pub fn replace(&mut self, record: T) -> bool {
        if !self.contains(record.id()) {
            return false;
        }
        let id = record.id().to_string();
        self.stage_existing(id, Staged::Replace(record));
        true
    }

    /// Stage a removal. Also cancels a staged insert of the same id.
    pub fn remove(&mut self, id: &str) -> bool {
        if self.contains(id) {
            self.stage_existing(id.to_string(), Staged::Remove);
            return true;
        }
        if let Some(pos) = self.insert_pos.remove(id) {
            self.inserts.remove(pos);
            for p in self.insert_pos.values_mut() {
                if *p > pos {
                    *p -= 1;
                }
            }
            return true;
        }
        false
    }

    fn stage_existing(&mut self, id: RecordId, op: Staged<T>) {
        match self.existing_pos.get(&id) {
            Some(&pos) => self.existing[pos].1 = op,
            None => {
                self.existing_pos.insert(id.clone(), self.existing.len());
                self.existing.push((id, op));
            }
        }
    }

    fn into_ops(self) -> StagedOps<T> {
        let mut removals = Vec::new();
        let mut replacements = Vec::new();
        for (id, op) in self.existing {
            match op {
                Staged::Remove => removals.push(id),
                Staged::Replace(record) => replacements.push(record),
            }
        }
        StagedOps {
            removals,
            replacements,
            inserts: self.inserts,
        }
    }
}

/// Thread-safe ordered collection of records, unique by id.
pub struct LiveVec<T> {
    inner: RwLock<Inner<T>>,
    pending: Outbox<CollectionChange<T>>,
    changed: EventEmitter<CollectionChange<T>>,
}

impl<T: SyncRecord> LiveVec<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: Vec::new(),
                index: HashMap::new(),
            }),
            pending: Outbox::new(),
            changed: EventEmitter::new(),
        }
    }

    // ── Observers ──────────────────────────────────────────────────

    pub fn on_change(
        &self,
        callback: impl Fn(&CollectionChange<T>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.changed.on(callback)
    }

    pub fn off(&self, id: ListenerId) {
        self.changed.off(id);
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// Stage and commit a batch atomically. Returns the changes it produced.
    ///
    /// Changes are emitted in commit order across threads. When another
    /// thread is still emitting an earlier batch, that thread emits this
    /// one too and the call returns without waiting for it.
    pub fn batch(&self, stage: impl FnOnce(&mut Batch<'_, T>)) -> Vec<CollectionChange<T>> {
        let changes = {
            let mut inner = self.inner.write();
            let ops = {
                let mut batch = Batch::new(&inner);
                stage(&mut batch);
                batch.into_ops()
            };
            let changes = inner.apply(ops);
            self.pending.extend(changes.iter().cloned());
            changes
        };
        self.pending.flush(|change| self.changed.emit(&change));
        changes
    }

    /// Append records whose ids are not yet present.
    pub fn add_range(&self, records: impl IntoIterator<Item = T>) -> Option<CollectionChange<T>> {
        self.batch(|b| {
            for record in records {
                b.insert(record);
            }
        })
        .pop()
    }

    /// Remove the items sharing an id with any of `records`.
    pub fn remove_range(&self, records: &[T]) -> Option<CollectionChange<T>> {
        self.batch(|b| {
            for record in records {
                b.remove(record.id());
            }
        })
        .pop()
    }

    /// Remove the items with the given ids.
    pub fn remove_ids<S: AsRef<str>>(&self, ids: &[S]) -> Option<CollectionChange<T>> {
        self.batch(|b| {
            for id in ids {
                b.remove(id.as_ref());
            }
        })
        .pop()
    }

    /// Update existing items in place from newer copies.
    pub fn replace_range(&self, records: impl IntoIterator<Item = T>) -> Option<CollectionChange<T>> {
        self.batch(|b| {
            for record in records {
                b.replace(record);
            }
        })
        .pop()
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().index.contains_key(id)
    }

    pub fn first_matching(&self, id: &str) -> Option<T> {
        let inner = self.inner.read();
        inner.position(id).map(|i| inner.items[i].clone())
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.inner.read().items.clone()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.inner
            .read()
            .items
            .iter()
            .map(|item| item.id().to_string())
            .collect()
    }
}

impl<T: SyncRecord> Default for LiveVec<T> {
    fn default() -> Self {
        Self::new()
    }
}
