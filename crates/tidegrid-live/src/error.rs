use std::fmt;

/// Errors from the live collection engine.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("record {index} of batch for table `{table}` has the wrong shape: {source}")]
    Conversion {
        table: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("pull `{query}` on table `{table}` failed: {source}")]
    Pull {
        table: String,
        query: String,
        #[source]
        source: SourceError,
    },

    #[error("pull `{query}` on table `{table}` was cancelled")]
    Cancelled { table: String, query: String },

    #[error("table `{table}` is already registered with a different record type")]
    TypeMismatch { table: String },

    #[error("live tables must be opened inside a tokio runtime")]
    NoRuntime,
}

pub type LiveResult<T> = Result<T, LiveError>;

/// What went wrong inside an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Transport,
    Store,
    Cancelled,
    Other,
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceErrorKind::Transport => "transport",
            SourceErrorKind::Store => "store",
            SourceErrorKind::Cancelled => "cancelled",
            SourceErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Error returned by a [`TableReader`](crate::TableReader) or
/// [`RemotePull`](crate::RemotePull) implementation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transport, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Store, message)
    }

    pub fn cancelled() -> Self {
        Self::new(SourceErrorKind::Cancelled, "operation cancelled")
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Other, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == SourceErrorKind::Cancelled
    }
}

impl From<tidegrid_state::StoreError> for SourceError {
    fn from(e: tidegrid_state::StoreError) -> Self {
        SourceError::store(e.to_string())
    }
}
