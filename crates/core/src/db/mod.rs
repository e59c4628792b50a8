//! Workspace layout, configuration and baseline persistence.
//!
//! - `WorkspaceLayout`: computed paths for workspace directories/files.
//! - `WorkspaceConfig`: serializable workspace metadata and analysis settings.
//! - `BaselineDb`: SQLite store for baselines and merge history.
//! - `WorkspaceContext`: everything above, loaded once for a workspace root.

mod baseline_db;
mod config;
mod context;
mod layout;
mod models;
mod util;

pub use baseline_db::{BaselineDb, DbError, DbResult, CURRENT_SCHEMA_VERSION};
pub use config::{DbConfig, WorkspaceConfig, CONFIG_VERSION};
pub use context::WorkspaceContext;
pub use layout::WorkspaceLayout;
pub use models::{BaselineSummary, MergeRunRecord, MergeRunStatus};
pub use util::{load_workspace_config, open_baseline_db, resolve_db_path, save_workspace_config};
