use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tide_core::{Document, QueryRequest, TideConfig};
use tidegrid_live::{LiveTable, LiveTableOptions, LiveTableRegistry, PullOutcome, StoreRelay};
use tracing::{debug, info};

use crate::remote::SnapshotRemote;

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run(config_path: &Path, remote: &Path) -> anyhow::Result<()> {
    let sizes = replay(config_path, remote, LiveTableRegistry::global().clone()).await?;

    println!("{:<24} {:>8}", "TABLE", "ROWS");
    for (table, rows) in sizes {
        println!("{table:<24} {rows:>8}");
    }
    Ok(())
}

/// Mirror every configured table, pull everything plus each configured
/// query from `remote`, and return the final mirror sizes.
pub async fn replay(
    config_path: &Path,
    remote: &Path,
    registry: Arc<LiveTableRegistry>,
) -> anyhow::Result<Vec<(String, usize)>> {
    let config = TideConfig::from_file(config_path)?;
    let store = super::open_store(config_path, &config)?;
    store.add_observer(Arc::new(StoreRelay::new(registry.clone())));
    let remote = Arc::new(SnapshotRemote::new(remote, store.clone()));

    let mut mirrors = Vec::with_capacity(config.tables.len());
    for table_config in &config.tables {
        let options = LiveTableOptions::<Document>::new(Arc::new(store.clone()), remote.clone())
            .with_sync_config(&config.sync);
        let table = LiveTable::open(&registry, &table_config.name, options)?;

        let name = table_config.name.clone();
        table.on_collection_changed(move |change| {
            info!(table = %name, kind = change.kind(), count = change.len(), "mirror changed");
        });
        let name = table_config.name.clone();
        table.on_pulling_changed(move |pulling| {
            debug!(table = %name, pulling, "pulling changed");
        });
        mirrors.push((table_config, table));
    }

    for (table_config, table) in &mirrors {
        if tokio::time::timeout(LOAD_TIMEOUT, table.wait_for_loading())
            .await
            .is_err()
        {
            bail!("table `{}` did not finish loading", table_config.name);
        }
        info!(table = %table_config.name, rows = table.len(), "initial load complete");
    }

    for (table_config, table) in &mirrors {
        let mut requests = vec![QueryRequest::all()];
        for query in &table_config.queries {
            requests.push(query.to_request()?);
        }
        for request in requests {
            let query = request.id().to_string();
            let outcome = table
                .request_pull(request)
                .await
                .with_context(|| format!("pull `{query}` on `{}` failed", table_config.name))?;
            if outcome != PullOutcome::Completed {
                debug!(table = %table_config.name, %query, ?outcome, "pull not run inline");
            }
        }
    }

    Ok(mirrors
        .iter()
        .map(|(table_config, table)| (table_config.name.clone(), table.len()))
        .collect())
}
