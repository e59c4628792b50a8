use std::path::{Path, PathBuf};

/// Logical layout of an analysis workspace on disk.
///
/// Derived from a chosen root path without touching the filesystem. Frontends
/// create the directories and files it names.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    /// Root directory of the workspace.
    pub root: PathBuf,
    /// Directory for internal metadata (.cfi).
    pub meta_dir: PathBuf,
    /// Path to the workspace config file (JSON).
    pub config_path: PathBuf,
    /// Path to the baseline database file.
    pub db_path: PathBuf,
    /// Directory holding `*.asd` distribution configs.
    pub distributions_dir: PathBuf,
    /// Directory for rendered reports.
    pub reports_dir: PathBuf,
    /// Directory for event-frequency files.
    pub stats_dir: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".cfi");
        let config_path = meta_dir.join("workspace.json");
        let db_path = meta_dir.join("baselines.db");
        let distributions_dir = root.join("config");
        let reports_dir = root.join("reports");
        let stats_dir = root.join("stats");

        Self { root, meta_dir, config_path, db_path, distributions_dir, reports_dir, stats_dir }
    }

    /// Database path to store in `WorkspaceConfig`, relative to `root` when possible.
    pub fn db_path_relative_string(&self) -> String {
        match self.db_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => self.db_path.to_string_lossy().to_string(),
        }
    }

    /// Directories `init-workspace` creates, in creation order.
    pub fn directories(&self) -> [&Path; 4] {
        [&self.meta_dir, &self.distributions_dir, &self.reports_dir, &self.stats_dir]
    }

    /// Default location of the event-frequency file written by `tally-frequencies`.
    pub fn default_stats_path(&self) -> PathBuf {
        self.stats_dir.join("frequencies.json")
    }
}
