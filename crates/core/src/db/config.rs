use serde::{Deserialize, Serialize};

use crate::merge::MergeConfig;
use crate::report::RiskConfig;

/// Current version of the workspace config format.
pub const CONFIG_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the baseline database (typically relative to the workspace root).
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Serializable configuration of an analysis workspace, kept at `.cfi/workspace.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub name: String,
    pub description: Option<String>,
    /// Version of this config format.
    pub config_version: String,
    pub db: DbConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl WorkspaceConfig {
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: CONFIG_VERSION.to_string(),
            db: DbConfig::new(db_path),
            merge: MergeConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}
