use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use cfi_merge_core::classify::OutcomeTally;
use cfi_merge_core::db::{MergeRunRecord, MergeRunStatus, WorkspaceContext};
use cfi_merge_core::graph::ExecutionGraph;
use cfi_merge_core::merge::{MatchTrace, MergeRecorder, MergeStatistics, MergeStrategy};
use cfi_merge_core::report::{ExecutionReport, ProgramEventFrequencies, ScoredEntry};
use cfi_merge_core::trace::{load_execution_graphs, load_graph_json, TraceDirectory};
use serde::Serialize;

use crate::{canonicalize_or_current, load_frequencies};

/// Inputs of one `merge` invocation.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub root: String,
    pub traces: Vec<String>,
    pub graphs: Vec<String>,
    pub stats: Option<String>,
    pub report: Option<String>,
    pub trace_matches: bool,
    pub strategy: Option<MergeStrategy>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct MergeSummary {
    pub module: String,
    pub distribution: String,
    pub source: String,
    pub status: MergeRunStatus,
    pub new_module: bool,
    pub statistics: Option<MergeStatistics>,
    pub outcomes: Option<OutcomeTally>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_trace: Option<MatchTrace>,
}

#[derive(Serialize)]
struct MergeRunOutput<'a> {
    merges: &'a [MergeSummary],
    report: &'a [ScoredEntry],
}

/// Merge executions into the workspace baselines and report what was new.
///
/// Every execution is attempted. Rejected merges leave their baseline as it
/// was and make the command fail after the report is written.
pub fn merge_command(options: &MergeOptions) -> Result<()> {
    if options.traces.is_empty() && options.graphs.is_empty() {
        return Err(anyhow!("Nothing to merge; pass --trace <DIR> or --graph <FILE>"));
    }

    let root_path = canonicalize_or_current(&options.root)?;
    let mut ctx = WorkspaceContext::from_root(&root_path)?;
    if let Some(strategy) = options.strategy {
        ctx.analysis.merge.strategy = strategy;
    }
    log::debug!("Merging with the {} strategy", ctx.analysis.merge.strategy);
    let mut baselines = ctx.db.load_all().context("Failed to load stored baselines")?;

    // Scores come from history, so they are fixed before this run changes anything.
    let frequencies = match &options.stats {
        Some(path) => load_frequencies(Path::new(path))?,
        None if ctx.layout.default_stats_path().exists() => {
            load_frequencies(&ctx.layout.default_stats_path())?
        }
        None => ProgramEventFrequencies::tally(baselines.iter()),
    };

    let executions = collect_executions(options)?;
    let mut report = ExecutionReport::new(&frequencies, ctx.analysis.risk)
        .context("Invalid risk settings in workspace config")?;
    let record = options.trace_matches || ctx.analysis.merge.record_matches;

    let mut summaries = Vec::new();
    for (source, execution) in &executions {
        let started_at = chrono::Utc::now().to_rfc3339();
        let distribution = ctx.analysis.registry.distribution_for(&execution.module).to_string();
        let mut trace = record.then(MatchTrace::new);
        let recorder = trace.as_mut().map(|t| t as &mut dyn MergeRecorder);

        let mut summary = MergeSummary {
            module: execution.module.clone(),
            distribution: distribution.clone(),
            source: source.clone(),
            status: MergeRunStatus::Merged,
            new_module: false,
            statistics: None,
            outcomes: None,
            message: None,
            match_trace: None,
        };

        match baselines.merge_execution(&ctx.analysis, execution, recorder) {
            Ok(outcome) => {
                report.add_outcome(&outcome);
                if let Some(baseline) = baselines.get(&outcome.distribution) {
                    ctx.db.save_baseline(baseline).with_context(|| {
                        format!("Failed to save baseline {}", outcome.distribution)
                    })?;
                }
                summary.new_module = outcome.new_module;
                summary.statistics = Some(outcome.statistics);
                summary.outcomes = Some(outcome.outcomes);
            }
            Err(err) => {
                eprintln!("Rejected merge of {} from {}: {err}", execution.module, source);
                summary.status = MergeRunStatus::Rejected;
                summary.message = Some(err.to_string());
            }
        }
        summary.match_trace = trace;

        let stats = summary.statistics.clone().unwrap_or_default();
        ctx.db
            .record_merge_run(&MergeRunRecord {
                distribution,
                module: summary.module.clone(),
                source: source.clone(),
                status: summary.status,
                new_nodes: stats.new_nodes,
                new_edges: stats.new_edges,
                matched_nodes: stats.matched(),
                message: summary.message.clone(),
                started_at,
                finished_at: chrono::Utc::now().to_rfc3339(),
            })
            .context("Failed to record merge run")?;
        summaries.push(summary);
    }

    report.sort();
    if let Some(path) = &options.report {
        write_report(Path::new(path), &report)?;
    }

    if options.json {
        let output = MergeRunOutput { merges: &summaries, report: report.entries() };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summaries(&summaries);
        if options.report.is_none() {
            for line in report.lines() {
                println!("{line}");
            }
        }
    }

    let rejected = summaries.iter().filter(|s| s.status == MergeRunStatus::Rejected).count();
    if rejected > 0 {
        return Err(anyhow!("{rejected} of {} merges were rejected", summaries.len()));
    }
    Ok(())
}

/// Load every requested execution, labelled with where it came from.
fn collect_executions(options: &MergeOptions) -> Result<Vec<(String, ExecutionGraph)>> {
    let mut executions = Vec::new();
    for trace in &options.traces {
        let dir = canonicalize_or_current(trace)?;
        let trace_dir = TraceDirectory::open(&dir)
            .with_context(|| format!("Failed to open trace directory {}", dir.display()))?;
        let label = format!("{} ({})", dir.display(), trace_dir);
        for execution in load_execution_graphs(&trace_dir)? {
            executions.push((label.clone(), execution));
        }
    }
    for graph in &options.graphs {
        let path = PathBuf::from(graph);
        let execution = load_graph_json(&path)?;
        executions.push((path.display().to_string(), execution));
    }
    Ok(executions)
}

fn write_report(path: &Path, report: &ExecutionReport<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    report
        .write_to(std::io::BufWriter::new(file))
        .with_context(|| format!("Failed to write report {}", path.display()))
}

fn print_summaries(summaries: &[MergeSummary]) {
    for summary in summaries {
        match (&summary.statistics, summary.status) {
            (Some(stats), MergeRunStatus::Merged) => println!(
                "Merged {} into {}{}: {} new nodes, {} new edges, {} matched",
                summary.module,
                summary.distribution,
                if summary.new_module { " (new module)" } else { "" },
                stats.new_nodes,
                stats.new_edges,
                stats.matched()
            ),
            _ => println!(
                "Rejected {} for {}: {}",
                summary.module,
                summary.distribution,
                summary.message.as_deref().unwrap_or("unknown reason")
            ),
        }
        if let Some(outcomes) = &summary.outcomes {
            for (outcome, count) in outcomes.iter() {
                println!("  {outcome}: {count}");
            }
        }
        if let Some(trace) = &summary.match_trace {
            for depth in trace.depths() {
                println!("  depth {depth}: {} decisions", trace.records_at(depth).len());
            }
        }
    }
}
