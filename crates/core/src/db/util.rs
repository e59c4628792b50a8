use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::db::{BaselineDb, WorkspaceConfig, WorkspaceLayout};

/// Load the workspace config JSON for a given layout.
pub fn load_workspace_config(layout: &WorkspaceLayout) -> Result<WorkspaceConfig> {
    let config_json = std::fs::read_to_string(&layout.config_path).with_context(|| {
        format!("Failed to read workspace config at {}", layout.config_path.display())
    })?;
    let config: WorkspaceConfig =
        serde_json::from_str(&config_json).context("Failed to parse workspace config JSON")?;
    config
        .risk
        .validate()
        .with_context(|| format!("Invalid risk settings in {}", layout.config_path.display()))?;
    Ok(config)
}

/// Write the workspace config JSON, pretty-printed.
pub fn save_workspace_config(layout: &WorkspaceLayout, config: &WorkspaceConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize workspace config")?;
    std::fs::write(&layout.config_path, json).with_context(|| {
        format!("Failed to write workspace config to {}", layout.config_path.display())
    })
}

/// Database path from the config, resolved against the workspace root when relative.
pub fn resolve_db_path(layout: &WorkspaceLayout, config: &WorkspaceConfig) -> PathBuf {
    let config_db_path = Path::new(&config.db.path);
    if config_db_path.is_absolute() {
        config_db_path.to_path_buf()
    } else {
        layout.root.join(config_db_path)
    }
}

/// Load the config and open the baseline database it names.
pub fn open_baseline_db(layout: &WorkspaceLayout) -> Result<(WorkspaceConfig, PathBuf, BaselineDb)> {
    let config = load_workspace_config(layout)?;
    let db_path = resolve_db_path(layout, &config);
    let db = BaselineDb::open(&db_path)
        .with_context(|| format!("Failed to open baseline database at {}", db_path.display()))?;
    Ok((config, db_path, db))
}
