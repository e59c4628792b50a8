//! Match outcome classification.
//!
//! Every matching decision the merger makes is graded against the baseline's
//! ground truth: the block at the same module-relative position. Grading never
//! touches the graph; it only feeds statistics and evaluation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::{Graph, NodeId};

/// Which heuristic produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchTier {
    /// Hash equality with a single candidate, or a deterministic edge from a matched parent.
    Pure,
    /// Neighborhood comparison or indirect-branch resolution.
    Context,
}

/// Whether the baseline already holds the block an incoming node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselinePresence {
    /// The baseline holds the counterpart at this id.
    Present(NodeId),
    /// The baseline has no block at the node's position.
    Absent,
    /// The node has no position to compare (boundary node or unknown module).
    Unknown,
}

/// Inputs to [`classify`] for one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchDecision {
    /// Hash of the incoming node.
    pub hash: u64,
    pub presence: BaselinePresence,
    /// Baseline node the merger chose, or `None` when it declared the node new.
    pub chosen: Option<NodeId>,
    pub tier: MatchTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchOutcome {
    Unknown,
    PureExistingCorrectMatch,
    PureExistingMismatch,
    PureExistingUnfoundMismatch,
    PureNonExistingCorrectMatch,
    PureNonExistingMismatch,
    ContextExistingCorrectMatch,
    ContextExistingMismatch,
    ContextExistingUnfoundMismatch,
    ContextNonExistingCorrectMatch,
    ContextNonExistingMismatch,
}

impl MatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOutcome::Unknown => "unknown",
            MatchOutcome::PureExistingCorrectMatch => "pure-existing-correct-match",
            MatchOutcome::PureExistingMismatch => "pure-existing-mismatch",
            MatchOutcome::PureExistingUnfoundMismatch => "pure-existing-unfound-mismatch",
            MatchOutcome::PureNonExistingCorrectMatch => "pure-non-existing-correct-match",
            MatchOutcome::PureNonExistingMismatch => "pure-non-existing-mismatch",
            MatchOutcome::ContextExistingCorrectMatch => "context-existing-correct-match",
            MatchOutcome::ContextExistingMismatch => "context-existing-mismatch",
            MatchOutcome::ContextExistingUnfoundMismatch => "context-existing-unfound-mismatch",
            MatchOutcome::ContextNonExistingCorrectMatch => "context-non-existing-correct-match",
            MatchOutcome::ContextNonExistingMismatch => "context-non-existing-mismatch",
        }
    }

    /// True for the two outcomes where the merger agreed with the ground truth.
    pub fn is_correct(&self) -> bool {
        matches!(
            self,
            MatchOutcome::PureExistingCorrectMatch
                | MatchOutcome::PureNonExistingCorrectMatch
                | MatchOutcome::ContextExistingCorrectMatch
                | MatchOutcome::ContextNonExistingCorrectMatch
        )
    }

    /// True when the ground truth says the block was already in the baseline.
    pub fn existed(&self) -> Option<bool> {
        match self {
            MatchOutcome::Unknown => None,
            MatchOutcome::PureExistingCorrectMatch
            | MatchOutcome::PureExistingMismatch
            | MatchOutcome::PureExistingUnfoundMismatch
            | MatchOutcome::ContextExistingCorrectMatch
            | MatchOutcome::ContextExistingMismatch
            | MatchOutcome::ContextExistingUnfoundMismatch => Some(true),
            MatchOutcome::PureNonExistingCorrectMatch
            | MatchOutcome::PureNonExistingMismatch
            | MatchOutcome::ContextNonExistingCorrectMatch
            | MatchOutcome::ContextNonExistingMismatch => Some(false),
        }
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grade one matching decision.
///
/// Every combination of presence, choice and tier maps to exactly one outcome.
///
/// # Panics
///
/// Panics if the chosen baseline node does not exist or carries a different
/// hash than the incoming node. The merger only ever chooses among nodes with
/// an equal hash, so either case is a defect in the caller.
pub fn classify(baseline: &Graph, decision: &MatchDecision) -> MatchOutcome {
    if let Some(chosen) = decision.chosen {
        match baseline.get(chosen) {
            Some(node) if node.hash() == decision.hash => {}
            Some(node) => panic!(
                "classifier defect: chose node {} for incoming hash 0x{:x}",
                node.key(),
                decision.hash
            ),
            None => panic!(
                "classifier defect: chose node {} which is not in the baseline ({} nodes)",
                chosen.0,
                baseline.node_count()
            ),
        }
    }

    use BaselinePresence::{Absent, Present, Unknown};
    use MatchTier::{Context, Pure};

    match (decision.presence, decision.chosen, decision.tier) {
        (Unknown, _, _) => MatchOutcome::Unknown,

        (Present(expected), Some(chosen), Pure) if expected == chosen => {
            MatchOutcome::PureExistingCorrectMatch
        }
        (Present(_), Some(_), Pure) => MatchOutcome::PureExistingMismatch,
        (Present(_), None, Pure) => MatchOutcome::PureExistingUnfoundMismatch,
        (Absent, None, Pure) => MatchOutcome::PureNonExistingCorrectMatch,
        (Absent, Some(_), Pure) => MatchOutcome::PureNonExistingMismatch,

        (Present(expected), Some(chosen), Context) if expected == chosen => {
            MatchOutcome::ContextExistingCorrectMatch
        }
        (Present(_), Some(_), Context) => MatchOutcome::ContextExistingMismatch,
        (Present(_), None, Context) => MatchOutcome::ContextExistingUnfoundMismatch,
        (Absent, None, Context) => MatchOutcome::ContextNonExistingCorrectMatch,
        (Absent, Some(_), Context) => MatchOutcome::ContextNonExistingMismatch,
    }
}

/// Count of decisions per outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    counts: BTreeMap<MatchOutcome, usize>,
}

impl OutcomeTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: MatchOutcome) {
        *self.counts.entry(outcome).or_insert(0) += 1;
    }

    pub fn count(&self, outcome: MatchOutcome) -> usize {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn correct(&self) -> usize {
        self.counts.iter().filter(|(outcome, _)| outcome.is_correct()).map(|(_, n)| n).sum()
    }

    pub fn merge(&mut self, other: &OutcomeTally) {
        for (outcome, count) in &other.counts {
            *self.counts.entry(*outcome).or_insert(0) += count;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MatchOutcome, usize)> + '_ {
        self.counts.iter().map(|(outcome, count)| (*outcome, *count))
    }
}
