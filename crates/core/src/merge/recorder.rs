use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::NodeKey;

/// How the merger arrived at a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchingType {
    /// Followed a deterministic edge from an already matched parent.
    DirectEdge,
    /// Resolved an indirect-branch target of an already matched parent.
    IndirectEdge,
    /// The hash has exactly one viable baseline node.
    PureHash,
    /// Several baseline nodes share the hash; neighborhoods decided.
    ContextCollision,
    /// Same module-relative position and the same block (tag strategy).
    Tag,
    /// No baseline node was chosen; the node is new.
    Unmatched,
}

/// One matching decision, keyed by the context depth it needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub depth: u32,
    pub incoming: NodeKey,
    pub candidates: Vec<NodeKey>,
    pub chosen: Option<NodeKey>,
    pub matching: MatchingType,
}

/// Similarity of one collision candidate at one depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextScore {
    pub depth: u32,
    pub incoming: NodeKey,
    pub candidate: NodeKey,
    /// Negative when a deterministic edge contradicts the incoming node.
    pub score: i64,
}

/// Sink for matching instrumentation. Absent unless a caller injects one.
pub trait MergeRecorder {
    fn record_match(&mut self, record: MatchRecord);

    fn record_context_score(&mut self, _score: ContextScore) {}
}

/// In-memory recorder grouping every entry by context depth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchTrace {
    matches: BTreeMap<u32, Vec<MatchRecord>>,
    scores: BTreeMap<u32, Vec<ContextScore>>,
}

impl MatchTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_at(&self, depth: u32) -> &[MatchRecord] {
        self.matches.get(&depth).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scores_at(&self, depth: u32) -> &[ContextScore] {
        self.scores.get(&depth).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Depths that hold at least one match record, ascending.
    pub fn depths(&self) -> Vec<u32> {
        self.matches.keys().copied().collect()
    }

    /// The record for an incoming node, wherever it was decided.
    pub fn decision_for(&self, incoming: NodeKey) -> Option<&MatchRecord> {
        self.matches.values().flatten().find(|record| record.incoming == incoming)
    }

    pub fn len(&self) -> usize {
        self.matches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

impl MergeRecorder for MatchTrace {
    fn record_match(&mut self, record: MatchRecord) {
        self.matches.entry(record.depth).or_default().push(record);
    }

    fn record_context_score(&mut self, score: ContextScore) {
        self.scores.entry(score.depth).or_default().push(score);
    }
}
