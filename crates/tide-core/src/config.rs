//! tide.toml configuration parser.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::QueryRequest;
use crate::record::Document;

const DEFAULT_LOAD_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TideConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    pub push_other_tables_first: Option<bool>,
    pub load_attempts: Option<u32>,
    pub load_backoff: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub queries: Vec<QueryConfig>,
}

/// A named equality filter on one document field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub id: String,
    pub field: String,
    pub equals: toml::Value,
}

impl TideConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config `{}`", path.display()))?;
        let config: TideConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Table names must be non-empty and unique; query ids unique per table.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                bail!("table name cannot be empty");
            }
            if !seen.insert(table.name.as_str()) {
                bail!("table `{}` is configured twice", table.name);
            }
            let mut query_ids = HashSet::new();
            for query in &table.queries {
                if !query_ids.insert(query.id.as_str()) {
                    bail!("query `{}` is configured twice on table `{}`", query.id, table.name);
                }
            }
        }
        Ok(())
    }

    /// Scaffold a minimal tide.toml mirroring one table.
    pub fn scaffold(table: &str) -> Self {
        TideConfig {
            store: StoreConfig {
                path: PathBuf::from("tide.redb"),
            },
            sync: SyncConfig {
                push_other_tables_first: Some(true),
                load_attempts: Some(3),
                load_backoff: Some("500ms".to_string()),
            },
            tables: vec![TableConfig {
                name: table.to_string(),
                queries: Vec::new(),
            }],
        }
    }
}

impl SyncConfig {
    pub fn push_other_tables_first(&self) -> bool {
        self.push_other_tables_first.unwrap_or(true)
    }

    /// Number of initial-load attempts; never less than one.
    pub fn load_attempts(&self) -> u32 {
        self.load_attempts.unwrap_or(1).max(1)
    }

    pub fn load_backoff(&self) -> Duration {
        self.load_backoff
            .as_deref()
            .map(|s| parse_duration(s, DEFAULT_LOAD_BACKOFF))
            .unwrap_or(DEFAULT_LOAD_BACKOFF)
    }
}

impl QueryConfig {
    /// Build a pull request matching documents whose `field` equals `equals`.
    pub fn to_request(&self) -> anyhow::Result<QueryRequest<Document>> {
        let expected = serde_json::to_value(&self.equals)
            .with_context(|| format!("query `{}` has an unsupported value", self.id))?;
        let field = self.field.clone();
        Ok(QueryRequest::new(self.id.clone(), move |doc: &Document| {
            doc.get(&field) == Some(&expected)
        }))
    }
}

/// Parse `"<n>ms"` or `"<n>s"`, falling back to `default` on anything else.
pub fn parse_duration(s: &str, default: Duration) -> Duration {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).unwrap_or(default)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).unwrap_or(default)
    } else {
        default
    }
}
