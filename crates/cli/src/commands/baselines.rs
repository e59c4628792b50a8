use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use cfi_merge_core::db::{MergeRunRecord, WorkspaceContext};
use cfi_merge_core::report::ProgramEventFrequencies;
use serde::Serialize;

use crate::{canonicalize_or_current, save_frequencies};

#[derive(Serialize)]
pub struct BaselineView {
    pub distribution: String,
    pub modules: Vec<String>,
    pub nodes: usize,
    pub edges: usize,
    pub colliding_hashes: usize,
    pub node_kinds: BTreeMap<String, usize>,
    pub edge_kinds: BTreeMap<String, usize>,
    pub digest: String,
}

/// Show one stored baseline.
pub fn show_baseline_command(root: &str, distribution: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = WorkspaceContext::from_root(&root_path)?;
    let baseline = ctx
        .db
        .load_baseline(distribution)
        .with_context(|| format!("Failed to load baseline {distribution}"))?
        .ok_or_else(|| anyhow!("No baseline stored for distribution '{distribution}'"))?;

    let graph = &baseline.graph;
    let mut node_kinds = BTreeMap::new();
    for (_, node) in graph.nodes() {
        *node_kinds.entry(node.kind().as_str().to_string()).or_insert(0) += 1;
    }
    let mut edge_kinds = BTreeMap::new();
    for (_, edge) in graph.edges() {
        *edge_kinds.entry(edge.kind.as_str().to_string()).or_insert(0) += 1;
    }

    let view = BaselineView {
        distribution: baseline.distribution.clone(),
        modules: baseline.modules.iter().cloned().collect(),
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        colliding_hashes: graph.store().colliding_hashes().len(),
        node_kinds,
        edge_kinds,
        digest: baseline.digest(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Baseline: {}", view.distribution);
    println!("Modules: {}", view.modules.join(", "));
    println!("Nodes: {} ({} colliding hashes)", view.nodes, view.colliding_hashes);
    for (kind, count) in &view.node_kinds {
        println!("  - {kind}: {count}");
    }
    println!("Edges: {}", view.edges);
    for (kind, count) in &view.edge_kinds {
        println!("  - {kind}: {count}");
    }
    println!("Digest: {}", view.digest);
    Ok(())
}

/// List recorded merge runs, optionally for one distribution.
pub fn list_merge_runs_command(root: &str, distribution: Option<&str>, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = WorkspaceContext::from_root(&root_path)?;
    let runs: Vec<MergeRunRecord> =
        ctx.db.list_merge_runs(distribution).context("Failed to list merge runs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No merge runs recorded.");
        return Ok(());
    }
    println!("Merge runs ({}):", runs.len());
    for run in &runs {
        println!(
            "- [{}] {} -> {} from {}: {} new nodes, {} new edges, {} matched ({} .. {})",
            run.status.as_str(),
            run.module,
            run.distribution,
            run.source,
            run.new_nodes,
            run.new_edges,
            run.matched_nodes,
            run.started_at,
            run.finished_at
        );
        if let Some(message) = &run.message {
            println!("    {message}");
        }
    }
    Ok(())
}

/// Derive event frequencies from the stored baselines and write them out.
pub fn tally_frequencies_command(root: &str, out: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let ctx = WorkspaceContext::from_root(&root_path)?;
    let baselines = ctx.db.load_all().context("Failed to load stored baselines")?;
    let frequencies = ProgramEventFrequencies::tally(baselines.iter());

    let out_path = match out {
        Some(path) => PathBuf::from(path),
        None => ctx.layout.default_stats_path(),
    };
    save_frequencies(&out_path, &frequencies)?;

    println!(
        "Wrote event frequencies for {} baselines to {}",
        baselines.len(),
        out_path.display()
    );
    println!(
        "  abnormal returns: {}, standalones: {}, indirect targets: {}, modules: {}",
        frequencies.abnormal_returns,
        frequencies.standalones,
        frequencies.indirect_targets.len(),
        frequencies.modules.len()
    );
    Ok(())
}
