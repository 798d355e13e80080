//! Record model shared across Tidegrid crates.
//!
//! Every mirrored row carries the same five system fields (`id`,
//! `updatedAt`, `createdAt`, `deleted`, `version`). Typed records embed
//! [`RecordMeta`] with `#[serde(flatten)]` and implement [`SyncRecord`];
//! schemaless tables use [`Document`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of a record, unique within its table.
pub type RecordId = String;

/// A record that can be mirrored in a live collection.
///
/// `update_from` copies the mutable state of a newer copy of the same record
/// into `self`. It must never touch the identity or the creation timestamp.
pub trait SyncRecord:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn id(&self) -> &str;

    fn is_deleted(&self) -> bool;

    fn update_from(&mut self, newer: &Self);
}

/// System fields present on every synced row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Soft-delete flag. Deleted rows are never surfaced in a mirror.
    #[serde(default)]
    pub deleted: bool,
    /// Opaque server version token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RecordMeta {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            updated_at: None,
            created_at: None,
            deleted: false,
            version: None,
        }
    }

    /// Copy `updated_at`, `deleted` and `version` from a newer copy.
    pub fn update_from(&mut self, newer: &RecordMeta) {
        self.updated_at = newer.updated_at;
        self.deleted = newer.deleted;
        self.version = newer.version.clone();
    }
}

/// A schemaless record: system fields plus an arbitrary JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            meta: RecordMeta::new(id),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style soft-delete marker.
    pub fn deleted(mut self) -> Self {
        self.meta.deleted = true;
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Serialize into the JSON object shape stored and exchanged with remotes.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl SyncRecord for Document {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn is_deleted(&self) -> bool {
        self.meta.deleted
    }

    fn update_from(&mut self, newer: &Self) {
        self.meta.update_from(&newer.meta);
        self.fields = newer.fields.clone();
    }
}
