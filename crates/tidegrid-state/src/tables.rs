//! redb table definitions for the Tidegrid local store.
//!
//! Tables are created on demand, one per synced table name. Keys are record
//! ids, values are the JSON-serialized row.

use redb::TableDefinition;

use crate::error::{StoreError, StoreResult};

/// Table definition for a synced table called `name`.
pub fn record_table(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// Reject names redb cannot hold or that would be ambiguous in logs.
pub fn validate_table_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.trim() != name {
        return Err(StoreError::InvalidTable(name.to_string()));
    }
    Ok(())
}
