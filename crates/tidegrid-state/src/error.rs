//! Local store errors.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures are flattened to strings; redb's error types differ per call site.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open local store: {0}")]
    Open(String),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open record table: {0}")]
    Table(String),

    #[error("cannot read rows: {0}")]
    Read(String),

    #[error("cannot write rows: {0}")]
    Write(String),

    #[error("cannot encode row: {0}")]
    Serialize(String),

    #[error("stored row is not valid JSON: {0}")]
    Deserialize(String),

    #[error("record {index} in batch for table `{table}` has no string `id`")]
    MissingId { table: String, index: usize },

    #[error("invalid table name: {0:?}")]
    InvalidTable(String),
}
