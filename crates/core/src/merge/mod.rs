//! Folding execution graphs into distribution baselines.
//!
//! A merge runs in two phases. Matching walks the incoming graph and decides,
//! for every node, which baseline node (if any) it is; this phase only reads
//! the baseline. The commit phase then stages every new node and edge, checks
//! the staged edges against the baseline, and applies them only when nothing
//! conflicts. A [`MergeFailure`] therefore always leaves the baseline exactly
//! as it was.

pub mod baselines;
mod commit;
mod context;
mod matcher;
pub mod recorder;
mod subgraphs;
mod tag;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use baselines::DistributionBaselines;
pub use recorder::{ContextScore, MatchRecord, MatchTrace, MatchingType, MergeRecorder};

use crate::classify::{classify, BaselinePresence, MatchDecision, MatchTier, OutcomeTally};
use crate::graph::{
    Edge, EdgeType, ExecutionGraph, Graph, MergedClusterGraph, MetaNodeType, NodeId, NodeKey,
    UNKNOWN_MODULE,
};
use crate::report::{NodeSummary, ReportEntry};

/// Default bound on neighborhood comparison depth.
pub const DEFAULT_MAX_CONTEXT_DEPTH: u32 = 3;

/// How incoming nodes find their baseline counterparts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Content hashes, with neighborhood comparison on collision.
    #[default]
    Hash,
    /// Module-relative position, confirmed by hash. Only sound when both graphs
    /// come from the same build of every module.
    Tag,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Hash => "hash",
            MergeStrategy::Tag => "tag",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "hash" => Ok(MergeStrategy::Hash),
            "tag" => Ok(MergeStrategy::Tag),
            other => Err(format!("unknown merge strategy '{other}' (expected hash or tag)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Deepest neighborhood compared when hashes collide. Zero disables context matching.
    #[serde(default = "default_max_context_depth")]
    pub max_context_depth: u32,
    /// Keep a match trace for every merge.
    #[serde(default)]
    pub record_matches: bool,
    #[serde(default)]
    pub strategy: MergeStrategy,
}

fn default_max_context_depth() -> u32 {
    DEFAULT_MAX_CONTEXT_DEPTH
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_context_depth: DEFAULT_MAX_CONTEXT_DEPTH,
            record_matches: false,
            strategy: MergeStrategy::Hash,
        }
    }
}

/// The merger's verdict for one incoming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDecision {
    pub incoming: NodeId,
    /// Baseline counterpart, `None` when the node is new.
    pub matched: Option<NodeId>,
    pub tier: MatchTier,
    /// Context depth that settled the decision; zero when no comparison ran.
    pub depth: u32,
    pub matching: MatchingType,
}

/// Counters describing how one merge went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStatistics {
    pub direct_attempts: usize,
    pub direct_matches: usize,
    pub indirect_attempts: usize,
    pub indirect_matches: usize,
    pub hash_attempts: usize,
    pub pure_matches: usize,
    pub context_attempts: usize,
    pub context_matches: usize,
    pub context_ties: usize,
    /// Tag strategy: positions whose baseline block was accepted.
    pub tag_matches: usize,
    /// Tag strategy: positions whose baseline block differs in hash, kind or edges.
    pub tag_mismatches: usize,
    pub unmatched: usize,
    pub new_nodes: usize,
    pub new_edges: usize,
    pub existing_edges: usize,
}

impl MergeStatistics {
    pub fn matched(&self) -> usize {
        self.direct_matches
            + self.indirect_matches
            + self.pure_matches
            + self.context_matches
            + self.tag_matches
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeFailure {
    #[error(
        "Edge {from} -> {to} is {incoming_kind:?}/{incoming_ordinal} in the execution but \
         {existing_kind:?}/{existing_ordinal} in the baseline"
    )]
    EdgeConflict {
        from: NodeKey,
        to: NodeKey,
        existing_kind: EdgeType,
        existing_ordinal: u32,
        incoming_kind: EdgeType,
        incoming_ordinal: u32,
    },

    #[error("Execution graph for module {expected} contains node {key} of module {found}")]
    ModuleMismatch { expected: String, found: String, key: NodeKey },

    #[error("Module {module} belongs to distribution {claimed}, not {requested}")]
    DistributionConflict { module: String, claimed: String, requested: String },

    #[error("Module {module} is already part of the {holder} baseline and cannot join {requested}")]
    ModuleHeldElsewhere { module: String, holder: String, requested: String },
}

/// Everything one successful merge changed and learned.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub module: String,
    pub distribution: String,
    /// The baseline had never seen this module before the merge.
    pub new_module: bool,
    pub decisions: Vec<NodeDecision>,
    /// Baseline ids of the nodes the merge added.
    pub new_nodes: Vec<NodeId>,
    pub new_edges: usize,
    pub statistics: MergeStatistics,
    pub outcomes: OutcomeTally,
    /// Anomaly candidates for the report, in discovery order.
    pub candidates: Vec<ReportEntry>,
}

/// Merges execution graphs into a baseline.
///
/// A recorder is optional. Without one, the merger keeps no per-decision
/// instrumentation.
pub struct GraphMerger<'r> {
    config: MergeConfig,
    recorder: Option<&'r mut dyn MergeRecorder>,
}

impl<'r> GraphMerger<'r> {
    pub fn new(config: MergeConfig) -> Self {
        Self { config, recorder: None }
    }

    pub fn with_recorder(mut self, recorder: &'r mut dyn MergeRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Fold `execution` into `baseline`.
    ///
    /// On error the baseline is untouched.
    pub fn merge(
        &mut self,
        baseline: &mut MergedClusterGraph,
        execution: &ExecutionGraph,
    ) -> Result<MergeOutcome, MergeFailure> {
        check_modules(execution)?;

        let record = self.recorder.is_some();
        let correspondence = match self.config.strategy {
            MergeStrategy::Hash => matcher::MatchSession::new(
                &baseline.graph,
                &execution.graph,
                self.config.max_context_depth,
                record,
            )
            .run(),
            MergeStrategy::Tag => tag::TagSession::new(&baseline.graph, &execution.graph, record).run(),
        };

        let mut outcomes = OutcomeTally::new();
        for decision in &correspondence.decisions {
            let node = execution.graph.node(decision.incoming);
            let graded = MatchDecision {
                hash: node.hash(),
                presence: presence(&baseline.graph, &execution.graph, decision.incoming),
                chosen: decision.matched,
                tier: decision.tier,
            };
            outcomes.record(classify(&baseline.graph, &graded));
        }

        if let Some(recorder) = self.recorder.as_mut() {
            for record in correspondence.records.iter().cloned() {
                recorder.record_match(record);
            }
            for score in correspondence.scores.iter().cloned() {
                recorder.record_context_score(score);
            }
        }

        let plan = commit::plan(&baseline.graph, &execution.graph, &correspondence.matched)
            .inspect_err(|err| {
                log::warn!("Merge of {} into {} rejected: {err}", execution.module, baseline.distribution)
            })?;

        let mut statistics = correspondence.statistics;
        statistics.existing_edges = plan.existing_edges;

        let new_module = !baseline.contains_module(&execution.module);
        // Region analysis compares against the baseline as it was before this merge.
        let standalones = if new_module {
            Vec::new()
        } else {
            standalone_candidates(
                &baseline.graph,
                execution,
                &correspondence.matched,
                self.config.max_context_depth,
            )
        };
        let applied = commit::apply(&mut baseline.graph, plan);
        baseline.modules.insert(execution.module.clone());

        statistics.new_nodes = applied.nodes.len();
        statistics.new_edges = applied.edges.len();

        let candidates = if new_module {
            vec![ReportEntry::NewModule { module: execution.module.clone() }]
        } else {
            let mut candidates = edge_candidates(&baseline.graph, &applied);
            candidates.extend(standalones);
            candidates
        };

        log::info!(
            "Merged {} into {}: {} new nodes, {} new edges, {} of {} nodes matched",
            execution.module,
            baseline.distribution,
            statistics.new_nodes,
            statistics.new_edges,
            statistics.matched(),
            execution.graph.node_count()
        );

        Ok(MergeOutcome {
            module: execution.module.clone(),
            distribution: baseline.distribution.clone(),
            new_module,
            decisions: correspondence.decisions,
            new_nodes: applied.nodes.iter().map(|(_, id)| *id).collect(),
            new_edges: applied.edges.len(),
            statistics,
            outcomes,
            candidates,
        })
    }
}

fn check_modules(execution: &ExecutionGraph) -> Result<(), MergeFailure> {
    for (_, node) in execution.graph.nodes() {
        if node.module() != execution.module {
            return Err(MergeFailure::ModuleMismatch {
                expected: execution.module.clone(),
                found: node.module().to_string(),
                key: node.key(),
            });
        }
    }
    Ok(())
}

/// Ground truth for an incoming node: the baseline block at the same position.
fn presence(baseline: &Graph, incoming: &Graph, id: NodeId) -> BaselinePresence {
    let node = incoming.node(id);
    if node.kind().is_boundary() || node.module() == UNKNOWN_MODULE {
        return BaselinePresence::Unknown;
    }
    match baseline.find_by_tag(node.module(), node.tag(), node.version()) {
        Some(found) => BaselinePresence::Present(found),
        None => BaselinePresence::Absent,
    }
}

/// Whether a new edge marks its source as an abnormal return.
///
/// A return block reached something new, or the tracer flagged the return
/// as not going back to its caller.
fn is_abnormal_return(baseline: &Graph, edge: &Edge) -> bool {
    edge.kind == EdgeType::UnexpectedReturn || baseline.node(edge.from).kind() == MetaNodeType::Return
}

/// Node and edge candidates for a merge into a module the baseline already knew.
fn edge_candidates(baseline: &Graph, applied: &commit::Applied) -> Vec<ReportEntry> {
    let mut candidates = Vec::new();

    let mut abnormal_sources = BTreeSet::new();
    for edge_id in &applied.edges {
        let edge = baseline.edge(*edge_id);
        if is_abnormal_return(baseline, edge) {
            abnormal_sources.insert(edge.from);
        }
    }
    for source in abnormal_sources {
        candidates.push(ReportEntry::AbnormalReturn { node: NodeSummary::of(baseline.node(source)) });
    }

    for (_, id) in &applied.nodes {
        let node = baseline.node(*id);
        if node.kind() == MetaNodeType::Singleton {
            candidates.push(ReportEntry::JitSingleton { node: NodeSummary::of(node) });
        }
    }

    for edge_id in &applied.edges {
        let edge = baseline.edge(*edge_id);
        let from = NodeSummary::of(baseline.node(edge.from));
        let to = NodeSummary::of(baseline.node(edge.to));
        match edge.kind {
            EdgeType::Indirect => {
                candidates.push(ReportEntry::IndirectEdge { from, to, ordinal: edge.ordinal })
            }
            EdgeType::GencodePerm | EdgeType::GencodeWrite => candidates.push(
                ReportEntry::GencodeEdge { from, to, edge: edge.kind, ordinal: edge.ordinal },
            ),
            _ => {}
        }
    }

    candidates
}

/// Standalone regions of the execution that the baseline does not already cover.
///
/// A region node counts as known when the merger matched it, or when a
/// baseline standalone node with the same hash has a compatible neighborhood.
fn standalone_candidates(
    baseline: &Graph,
    execution: &ExecutionGraph,
    matched: &[Option<NodeId>],
    depth: u32,
) -> Vec<ReportEntry> {
    let mut compatibility = subgraphs::SubgraphCompatibility::new(&execution.graph, baseline);
    let mut candidates = Vec::new();

    for region in execution.graph.trampoline_regions() {
        let already_known = region
            .iter()
            .filter(|id| {
                matched.get(id.0).copied().flatten().is_some()
                    || compatibility.has_compatible_standalone(**id, depth)
            })
            .count();
        if already_known == region.len() {
            continue;
        }
        candidates.push(ReportEntry::NewStandalone {
            module: execution.module.clone(),
            node_count: region.len(),
            expanded_from: already_known,
        });
    }

    candidates
}
