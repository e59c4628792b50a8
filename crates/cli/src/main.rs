use anyhow::Result;
use cfi_merge::commands::*;
use cfi_merge_core::merge::MergeStrategy;
use clap::{Parser, Subcommand};

/// Control-flow baseline merging and anomaly reporting for recorded traces.
///
/// This CLI is a thin wrapper around `cfi-merge-core` (exposed in code as
/// `cfi_merge_core`). All substantive logic lives in the library.
#[derive(Parser, Debug)]
#[command(
    name = "cfi-merge",
    version,
    about = "Merge CFI execution traces into baselines and report what is new",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new analysis workspace at the given root.
    ///
    /// This will:
    /// - Create a `.cfi` metadata directory and the baseline database.
    /// - Create `config`, `reports` and `stats` directories.
    /// - Write a `.cfi/workspace.json` config file.
    InitWorkspace {
        /// Workspace root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional workspace name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show configuration and stored baselines of a workspace.
    WorkspaceInfo {
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List distributions configured under `config/*.asd`.
    ListDistributions {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Summarize the streams and module graphs of one trace directory.
    TraceInfo {
        /// Directory holding one process run's stream files.
        #[arg(long)]
        trace: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Merge executions into the workspace baselines and print a risk-ranked report.
    Merge {
        #[arg(long, default_value = ".")]
        root: String,

        /// Trace directory to merge. May be repeated.
        #[arg(long = "trace")]
        traces: Vec<String>,

        /// Execution graph JSON file to merge. May be repeated.
        #[arg(long = "graph")]
        graphs: Vec<String>,

        /// Event frequency file (.json, .yaml or .yml). Defaults to stats/frequencies.json,
        /// or to frequencies tallied from the stored baselines.
        #[arg(long)]
        stats: Option<String>,

        /// Write the report to this file instead of stdout.
        #[arg(long)]
        report: Option<String>,

        /// Record every matching decision and print per-depth counts.
        #[arg(long, default_value_t = false)]
        trace_matches: bool,

        /// Matching strategy (`hash` or `tag`). Overrides the workspace config.
        #[arg(long)]
        strategy: Option<MergeStrategy>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show one stored baseline.
    ShowBaseline {
        #[arg(long, default_value = ".")]
        root: String,

        /// Distribution name, e.g. `<main-program>` or a config file stem.
        #[arg(long)]
        distribution: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recorded merge runs.
    ListMergeRuns {
        #[arg(long, default_value = ".")]
        root: String,

        /// Only show runs for this distribution.
        #[arg(long)]
        distribution: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Count abnormal returns, indirect targets and standalone regions in the stored baselines.
    TallyFrequencies {
        #[arg(long, default_value = ".")]
        root: String,

        /// Output file (.json, .yaml or .yml). Defaults to stats/frequencies.json.
        #[arg(long)]
        out: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::InitWorkspace { root, name } => init_workspace_command(&root, name)?,
        Command::WorkspaceInfo { root, json } => workspace_info_command(&root, json)?,
        Command::ListDistributions { root, json } => list_distributions_command(&root, json)?,
        Command::TraceInfo { trace, json } => trace_info_command(&trace, json)?,
        Command::Merge { root, traces, graphs, stats, report, trace_matches, strategy, json } => {
            merge_command(&MergeOptions {
                root,
                traces,
                graphs,
                stats,
                report,
                trace_matches,
                strategy,
                json,
            })?
        }
        Command::ShowBaseline { root, distribution, json } => {
            show_baseline_command(&root, &distribution, json)?
        }
        Command::ListMergeRuns { root, distribution, json } => {
            list_merge_runs_command(&root, distribution.as_deref(), json)?
        }
        Command::TallyFrequencies { root, out } => tally_frequencies_command(&root, out)?,
    }

    Ok(())
}
