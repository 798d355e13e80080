pub mod config;
pub mod query;
pub mod record;

pub use config::TideConfig;
pub use query::{ALL_QUERY_ID, Predicate, QueryRequest};
pub use record::*;
