//! Process-wide map from table name to live table.
//!
//! At most one live table exists per name until [`LiveTableRegistry::reset`].
//! First creation runs under the write lock, so a concurrent loser never
//! invokes its factory.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::table::LiveCollection;

static GLOBAL: LazyLock<Arc<LiveTableRegistry>> =
    LazyLock::new(|| Arc::new(LiveTableRegistry::new()));

#[derive(Default)]
pub struct LiveTableRegistry {
    tables: RwLock<HashMap<String, Arc<dyn LiveCollection>>>,
}

impl LiveTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static Arc<LiveTableRegistry> {
        &GLOBAL
    }

    /// Return the table registered under `name`, or build, register and
    /// return one with `factory`.
    pub fn get_or_create(
        &self,
        name: &str,
        factory: impl FnOnce() -> Arc<dyn LiveCollection>,
    ) -> Arc<dyn LiveCollection> {
        if let Some(existing) = self.tables.read().get(name) {
            return Arc::clone(existing);
        }

        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(name) {
            return Arc::clone(existing);
        }
        let created = factory();
        tables.insert(name.to_string(), Arc::clone(&created));
        debug!(table = %name, "live table registered");
        created
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LiveCollection>> {
        self.tables.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget every table. Test and teardown only.
    pub fn reset(&self) {
        let dropped = std::mem::take(&mut *self.tables.write());
        debug!(count = dropped.len(), "live table registry reset");
    }
}
