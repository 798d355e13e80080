pub mod init;
pub mod inspect;
pub mod replay;

use std::path::{Path, PathBuf};

use anyhow::Context;
use tide_core::TideConfig;
use tidegrid_state::LocalStore;

/// Relative store paths are resolved against the config file's directory.
pub fn store_path(config_path: &Path, config: &TideConfig) -> PathBuf {
    if config.store.path.is_absolute() {
        return config.store.path.clone();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&config.store.path)
}

pub fn open_store(config_path: &Path, config: &TideConfig) -> anyhow::Result<LocalStore> {
    let path = store_path(config_path, config);
    LocalStore::open(&path).with_context(|| format!("failed to open store `{}`", path.display()))
}
