use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cfi_merge_core::db::{
    open_baseline_db, save_workspace_config, BaselineDb, BaselineSummary, WorkspaceConfig,
    WorkspaceLayout,
};
use cfi_merge_core::merge::MergeConfig;
use cfi_merge_core::report::RiskConfig;
use serde::Serialize;

use crate::{canonicalize_or_current, infer_workspace_name};

#[derive(Serialize)]
pub struct WorkspaceInfoSnapshot {
    pub name: String,
    pub engine_version: String,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub layout: WorkspaceInfoLayout,
    pub merge: MergeConfig,
    pub risk: RiskConfig,
    pub baselines: Vec<BaselineSummary>,
}

#[derive(Serialize)]
pub struct WorkspaceInfoLayout {
    pub meta_dir: String,
    pub distributions_dir: String,
    pub reports_dir: String,
    pub stats_dir: String,
}

/// Initialize a new analysis workspace at `root`.
pub fn init_workspace_command(root: &str, name: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = WorkspaceLayout::new(&root_path);

    let workspace_name = match name {
        Some(n) => n,
        None => infer_workspace_name(&root_path),
    };

    for dir in layout.directories() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config = WorkspaceConfig::new(&workspace_name, layout.db_path_relative_string());
    save_workspace_config(&layout, &config)?;

    // Create the database now so read-only commands work on a fresh workspace.
    BaselineDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize baseline database at {}", layout.db_path.display())
    })?;

    println!("Initialized CFI merge workspace:");
    println!("  Name: {}", workspace_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Distributions dir: {}", layout.distributions_dir.display());
    println!("  Reports dir: {}", layout.reports_dir.display());
    println!("  Stats dir: {}", layout.stats_dir.display());

    Ok(())
}

/// Show configuration and stored baselines of an existing workspace.
pub fn workspace_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = WorkspaceLayout::new(&root_path);
    let (config, _db_path, db) = open_baseline_db(&layout)?;
    let baselines = db.list_baselines().context("Failed to list baselines")?;

    if json {
        let snapshot = WorkspaceInfoSnapshot {
            name: config.name.clone(),
            engine_version: cfi_merge_core::version().to_string(),
            root: layout.root.display().to_string(),
            config_file: layout.config_path.display().to_string(),
            config_version: config.config_version.clone(),
            db_path: config.db.path.clone(),
            layout: WorkspaceInfoLayout {
                meta_dir: layout.meta_dir.display().to_string(),
                distributions_dir: layout.distributions_dir.display().to_string(),
                reports_dir: layout.reports_dir.display().to_string(),
                stats_dir: layout.stats_dir.display().to_string(),
            },
            merge: config.merge.clone(),
            risk: config.risk,
            baselines,
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Workspace: {}", config.name);
    if let Some(description) = &config.description {
        println!("Description: {description}");
    }
    println!("Root: {}", layout.root.display());
    println!("Config version: {}", config.config_version);
    println!("Engine version: {}", cfi_merge_core::version());
    println!("DB path: {}", config.db.path);
    print_dir_status("Meta dir (.cfi)", &layout.meta_dir);
    print_dir_status("Distributions dir", &layout.distributions_dir);
    print_dir_status("Reports dir", &layout.reports_dir);
    print_dir_status("Stats dir", &layout.stats_dir);
    println!("Merge strategy: {}", config.merge.strategy);
    println!("Max context depth: {}", config.merge.max_context_depth);
    println!("Record matches: {}", config.merge.record_matches);
    println!(
        "Risk medians (program/module): abnormal returns {}/{}, indirect edges {}/{}, standalones {}/{}",
        config.risk.abnormal_returns.program,
        config.risk.abnormal_returns.module,
        config.risk.indirect_edges.program,
        config.risk.indirect_edges.module,
        config.risk.standalones.program,
        config.risk.standalones.module
    );
    if baselines.is_empty() {
        println!("Baselines: (none)");
    } else {
        println!("Baselines:");
        for summary in &baselines {
            println!(
                "  - {} ({} modules, {} nodes, {} edges)",
                summary.distribution,
                summary.modules.len(),
                summary.node_count,
                summary.edge_count
            );
        }
    }

    Ok(())
}

/// Print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}
