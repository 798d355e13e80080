//! Post-commit hooks on local store writes.

use serde_json::Value;

/// Receives every batch write after it has been committed.
///
/// Batches are delivered one at a time, in commit order. Delivery happens on
/// a writer's thread after `commit()`, though not always the thread that
/// made that write: a writer that commits while another is still delivering
/// leaves its batch to that one. Hooks cannot fail the write; anything that
/// goes wrong inside a hook is the observer's to report.
pub trait StoreObserver: Send + Sync {
    /// Called with the exact rows of a committed batch upsert.
    fn after_upsert(&self, table: &str, records: &[Value]);

    /// Called with the ids that existed and were removed by a committed
    /// batch delete.
    fn after_delete(&self, table: &str, ids: &[String]);
}
