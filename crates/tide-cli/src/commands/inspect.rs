use std::path::Path;

use serde_json::{Map, Value};
use tide_core::TideConfig;
use tidegrid_state::LocalStore;

pub fn run(config_path: &Path, table: Option<&str>) -> anyhow::Result<()> {
    let config = TideConfig::from_file(config_path)?;
    let store = super::open_store(config_path, &config)?;
    let dump = collect(&store, table)?;
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}

/// Stored rows keyed by table name.
pub fn collect(store: &LocalStore, table: Option<&str>) -> anyhow::Result<Value> {
    let names = match table {
        Some(name) => vec![name.to_string()],
        None => {
            let mut names = store.table_names()?;
            names.sort();
            names
        }
    };

    let mut out = Map::new();
    for name in names {
        let rows = store.read_all(&name)?;
        out.insert(name, Value::Array(rows));
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_all_or_one_table() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert("a", &[json!({ "id": "1" })]).unwrap();
        store.upsert("b", &[json!({ "id": "2" }), json!({ "id": "3" })]).unwrap();

        let all = collect(&store, None).unwrap();
        assert_eq!(all["a"].as_array().unwrap().len(), 1);
        assert_eq!(all["b"].as_array().unwrap().len(), 2);

        let one = collect(&store, Some("b")).unwrap();
        assert!(one.get("a").is_none());

        let missing = collect(&store, Some("nope")).unwrap();
        assert_eq!(missing["nope"], json!([]));
    }
}
