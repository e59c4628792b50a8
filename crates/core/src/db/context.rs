use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::context::AnalysisContext;
use crate::db::{open_baseline_db, BaselineDb, WorkspaceConfig, WorkspaceLayout};
use crate::dist::DistributionRegistry;

/// Layout, config, open database and analysis settings of one workspace.
#[derive(Debug)]
pub struct WorkspaceContext {
    pub layout: WorkspaceLayout,
    pub config: WorkspaceConfig,
    pub db_path: PathBuf,
    pub db: BaselineDb,
    pub analysis: AnalysisContext,
}

impl WorkspaceContext {
    /// Load config, distributions and database for the workspace at `root`.
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let layout = WorkspaceLayout::new(root);
        let (config, db_path, db) = open_baseline_db(&layout)?;
        let registry = DistributionRegistry::load_dir(&layout.distributions_dir).with_context(|| {
            format!("Failed to load distributions from {}", layout.distributions_dir.display())
        })?;
        let analysis = AnalysisContext::new(registry)
            .with_merge_config(config.merge.clone())
            .with_risk_config(config.risk);
        Ok(Self { layout, config, db_path, db, analysis })
    }
}
