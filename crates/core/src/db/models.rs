use serde::{Deserialize, Serialize};

/// How a recorded merge ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergeRunStatus {
    Merged,
    Rejected,
}

impl MergeRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeRunStatus::Merged => "merged",
            MergeRunStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "merged" => Some(MergeRunStatus::Merged),
            "rejected" => Some(MergeRunStatus::Rejected),
            _ => None,
        }
    }
}

/// One merge attempt, kept for bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeRunRecord {
    pub distribution: String,
    pub module: String,
    /// Trace directory or graph file the execution came from.
    pub source: String,
    pub status: MergeRunStatus,
    pub new_nodes: usize,
    pub new_edges: usize,
    pub matched_nodes: usize,
    /// Failure reason for rejected merges.
    pub message: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

/// Headline numbers of a stored baseline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaselineSummary {
    pub distribution: String,
    pub modules: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub digest: String,
    pub updated_at: String,
}
