use anyhow::{Context, Result};
use cfi_merge_core::db::WorkspaceContext;
use serde::Serialize;

use crate::canonicalize_or_current;

#[derive(Serialize)]
pub struct DistributionInfo {
    pub name: String,
    pub units: Vec<String>,
    pub has_baseline: bool,
}

/// List configured distributions and whether each has a stored baseline.
pub fn list_distributions_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = WorkspaceContext::from_root(&root_path)?;
    let stored = ctx.db.baseline_names().context("Failed to list baselines")?;

    let infos: Vec<DistributionInfo> = ctx
        .analysis
        .registry
        .iter()
        .map(|dist| DistributionInfo {
            name: dist.name.clone(),
            units: dist.units.iter().map(|unit| unit.name.clone()).collect(),
            has_baseline: stored.contains(&dist.name),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("Distributions ({}):", infos.len());
    for info in &infos {
        let baseline = if info.has_baseline { "baseline stored" } else { "no baseline" };
        if info.units.is_empty() {
            println!("- {} [{baseline}]", info.name);
        } else {
            println!("- {} [{baseline}]: {}", info.name, info.units.join(", "));
        }
    }
    Ok(())
}
