use std::path::Path;

use anyhow::bail;
use tide_core::TideConfig;

pub fn run(table: &str, out: &Path) -> anyhow::Result<()> {
    if table.trim().is_empty() {
        bail!("table name cannot be empty");
    }
    if out.exists() {
        bail!("`{}` already exists", out.display());
    }

    let config = TideConfig::scaffold(table);
    std::fs::write(out, config.to_toml_string()?)?;
    println!("✓ Generated {}", out.display());
    Ok(())
}
