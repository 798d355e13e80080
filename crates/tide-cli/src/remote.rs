//! A stand-in network layer that serves pulls from a JSON snapshot file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tide_core::Document;
use tidegrid_live::{PullContext, RemotePull, SourceError};
use tidegrid_state::LocalStore;
use tracing::debug;

/// Re-reads `{ "<table>": [<record>, ...] }` on every pull and writes the
/// rows matching the request's predicate into the local store.
pub struct SnapshotRemote {
    path: PathBuf,
    store: LocalStore,
}

impl SnapshotRemote {
    pub fn new(path: impl AsRef<Path>, store: LocalStore) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            store,
        }
    }

    async fn load(&self, table: &str) -> Result<Vec<Value>, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::transport(format!("read {}: {e}", self.path.display())))?;
        let mut snapshot: HashMap<String, Vec<Value>> = serde_json::from_str(&raw)
            .map_err(|e| SourceError::transport(format!("parse {}: {e}", self.path.display())))?;
        Ok(snapshot.remove(table).unwrap_or_default())
    }
}

#[async_trait]
impl RemotePull<Document> for SnapshotRemote {
    async fn pull(&self, ctx: PullContext<'_, Document>) -> Result<(), SourceError> {
        let fetched = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(SourceError::cancelled()),
            rows = self.load(ctx.table) => rows?,
        };

        // Rows are stored in normalized document shape, not as received.
        let mut matched = Vec::with_capacity(fetched.len());
        for row in &fetched {
            let doc: Document = serde_json::from_value(row.clone())
                .map_err(|e| SourceError::other(format!("remote row for {}: {e}", ctx.table)))?;
            if ctx.request.matches(&doc) {
                let value = doc
                    .to_value()
                    .map_err(|e| SourceError::other(format!("encode row for {}: {e}", ctx.table)))?;
                matched.push(value);
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(SourceError::cancelled());
        }
        self.store.upsert(ctx.table, &matched)?;

        debug!(
            table = ctx.table,
            query = ctx.query_id(),
            fetched = fetched.len(),
            matched = matched.len(),
            push_other_tables_first = ctx.push_other_tables_first,
            "snapshot pull applied"
        );
        Ok(())
    }
}
