//! Local persistent store for mirrored tables.
//!
//! Backed by [redb](https://docs.rs/redb). Each synced table is a redb table
//! of `&str` record ids to JSON-serialized rows. Writers can register
//! [`StoreObserver`]s that run after every committed batch upsert or delete,
//! in commit order; that hook is how live mirrors learn about local writes.
//!
//! The `LocalStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod observer;
pub mod outbox;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use observer::StoreObserver;
pub use outbox::Outbox;
pub use store::LocalStore;
