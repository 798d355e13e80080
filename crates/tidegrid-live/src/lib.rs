//! Tidegrid live collections.
//!
//! A [`LiveTable`] keeps an in-memory, observable mirror of one locally
//! persisted table. It loads the table once, reconciles every batch the
//! local store reports through the [`StoreRelay`], and serializes remote
//! pulls so that at most one is in flight per table.

pub mod collection;
pub mod connectivity;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod registry;
pub mod relay;
pub mod source;
pub mod table;

pub use collection::{CollectionChange, LiveVec, Replacement};
pub use connectivity::Connectivity;
pub use dispatch::{ChannelDispatcher, DispatchLoop, Dispatcher, InlineDispatcher};
pub use emitter::{EventEmitter, ListenerId};
pub use error::{LiveError, LiveResult, SourceError, SourceErrorKind};
pub use registry::LiveTableRegistry;
pub use relay::StoreRelay;
pub use source::{PullContext, RemotePull, TableReader};
pub use table::{
    LiveCollection, LiveTable, LiveTableOptions, LoadState, PullOutcome, PullingGuard,
    ReconcileSummary,
};
