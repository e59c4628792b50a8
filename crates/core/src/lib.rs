//! cfi-merge-core
//!
//! Core library for building control-flow baselines from recorded execution
//! traces and reporting deviations from them.
//!
//! This crate defines the graph model and its content-addressed node store,
//! the graph merger that folds execution graphs into per-distribution
//! baselines, the match outcome classifier, the risk-scored report generator,
//! trace ingestion, and SQLite persistence for baselines.
//!
//! Nothing here prints. The `cfi-merge` binary is a thin shell over these
//! modules and talks to the user through `log` and its own output.

pub mod classify;
pub mod context;
pub mod db;
pub mod dist;
pub mod graph;
pub mod merge;
pub mod report;
pub mod trace;

/// Version of the merge engine, stamped into workspace info output.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
