//! Store change relay: forwards committed local-store writes to the live
//! table registered for the same table name.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tidegrid_state::StoreObserver;
use tracing::{debug, error};

use crate::registry::LiveTableRegistry;

/// [`StoreObserver`] that keeps live tables in step with the local store.
///
/// Tables without a registered live table are ignored. Reconciliation
/// failures, including panics, are logged and never reach the store.
pub struct StoreRelay {
    registry: Arc<LiveTableRegistry>,
}

impl StoreRelay {
    pub fn new(registry: Arc<LiveTableRegistry>) -> Self {
        Self { registry }
    }

    /// Relay into the process-wide registry.
    pub fn global() -> Self {
        Self::new(Arc::clone(LiveTableRegistry::global()))
    }
}

impl StoreObserver for StoreRelay {
    fn after_upsert(&self, table: &str, records: &[Value]) {
        let Some(live) = self.registry.get(table) else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| live.process_values(records))) {
            Ok(Ok(summary)) => {
                debug!(%table, count = records.len(), ?summary, "relayed upsert");
            }
            Ok(Err(e)) => {
                error!(%table, count = records.len(), error = %e, "relayed upsert failed");
            }
            Err(_) => {
                error!(%table, count = records.len(), "relayed upsert panicked");
            }
        }
    }

    fn after_delete(&self, table: &str, ids: &[String]) {
        let Some(live) = self.registry.get(table) else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| live.remove_by_ids(ids))) {
            Ok(removed) => debug!(%table, count = ids.len(), removed, "relayed delete"),
            Err(_) => error!(%table, count = ids.len(), "relayed delete panicked"),
        }
    }
}
