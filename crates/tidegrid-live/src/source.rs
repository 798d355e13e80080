//! Collaborator seams: where a live table reads its initial rows and how it
//! asks the network sync layer for a refresh.

use async_trait::async_trait;
use serde_json::Value;
use tide_core::QueryRequest;
use tidegrid_state::LocalStore;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

/// Reads every persisted row of a table.
#[async_trait]
pub trait TableReader: Send + Sync {
    async fn read_all(&self, table: &str) -> Result<Vec<Value>, SourceError>;
}

#[async_trait]
impl TableReader for LocalStore {
    async fn read_all(&self, table: &str) -> Result<Vec<Value>, SourceError> {
        LocalStore::read_all(self, table).map_err(SourceError::from)
    }
}

/// Everything a remote pull needs to know.
pub struct PullContext<'a, T> {
    pub table: &'a str,
    pub request: &'a QueryRequest<T>,
    pub push_other_tables_first: bool,
    pub cancel: CancellationToken,
}

impl<T> PullContext<'_, T> {
    pub fn query_id(&self) -> &str {
        self.request.id()
    }
}

/// Fetches remote rows for a query and writes them to the local store.
///
/// Implementations return once the store reflects the fetched rows. The
/// mirror is updated by the store's post-commit hook, not by the return
/// value. `cancel` should be checked at every suspension point.
#[async_trait]
pub trait RemotePull<T>: Send + Sync {
    async fn pull(&self, ctx: PullContext<'_, T>) -> Result<(), SourceError>;
}
