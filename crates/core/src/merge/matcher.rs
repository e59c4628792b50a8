use std::collections::{HashSet, VecDeque};

use crate::classify::MatchTier;
use crate::graph::{EdgeType, Graph, MetaNodeType, NodeId, NodeKey};
use crate::merge::context::{ContextMatcher, ContextResolution};
use crate::merge::recorder::{ContextScore, MatchRecord, MatchingType};
use crate::merge::{MergeStatistics, NodeDecision};

/// Indirect-class edge waiting for its parent's match to be resolved.
#[derive(Debug, Clone, Copy)]
struct PendingIndirect {
    left_parent: NodeId,
    child: NodeId,
    kind: EdgeType,
}

/// Everything the matching phase learned about one incoming graph.
pub(crate) struct Correspondence {
    /// Baseline counterpart per incoming node id.
    pub matched: Vec<Option<NodeId>>,
    /// One decision per incoming node, in the order they were made.
    pub decisions: Vec<NodeDecision>,
    pub statistics: MergeStatistics,
    pub records: Vec<MatchRecord>,
    pub scores: Vec<ContextScore>,
}

/// Read-only matching pass of an incoming graph against a baseline.
///
/// Works from three queues, always draining the most confident first: pairs
/// already matched (extended along deterministic edges), indirect edges of
/// matched parents, then nodes that need a hash lookup. When all three are
/// empty, the lowest undecided node id is queued for a hash lookup, so every
/// incoming node ends up with exactly one decision.
pub(crate) struct MatchSession<'a> {
    baseline: &'a Graph,
    incoming: &'a Graph,
    context: ContextMatcher<'a>,
    record: bool,
    matched: Vec<Option<NodeId>>,
    taken: HashSet<NodeId>,
    decided: Vec<bool>,
    extended: Vec<bool>,
    decisions: Vec<NodeDecision>,
    match_queue: VecDeque<(NodeId, NodeId)>,
    indirect_queue: VecDeque<PendingIndirect>,
    unmatched_queue: VecDeque<NodeId>,
    statistics: MergeStatistics,
    records: Vec<MatchRecord>,
    scores: Vec<ContextScore>,
}

impl<'a> MatchSession<'a> {
    pub(crate) fn new(baseline: &'a Graph, incoming: &'a Graph, max_depth: u32, record: bool) -> Self {
        let count = incoming.node_count();
        Self {
            baseline,
            incoming,
            context: ContextMatcher::new(baseline, incoming, max_depth),
            record,
            matched: vec![None; count],
            taken: HashSet::new(),
            decided: vec![false; count],
            extended: vec![false; count],
            decisions: Vec::with_capacity(count),
            match_queue: VecDeque::new(),
            indirect_queue: VecDeque::new(),
            unmatched_queue: VecDeque::new(),
            statistics: MergeStatistics::default(),
            records: Vec::new(),
            scores: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) -> Correspondence {
        for (id, node) in self.incoming.nodes() {
            let is_entry =
                matches!(node.kind(), MetaNodeType::ModuleEntry | MetaNodeType::SignatureHash);
            if is_entry || node.incoming().is_empty() {
                self.unmatched_queue.push_back(id);
            }
        }

        loop {
            if let Some((left, right)) = self.match_queue.pop_front() {
                self.extend(left, right);
            } else if let Some(pending) = self.indirect_queue.pop_front() {
                self.speculate(pending);
            } else if let Some(right) = self.unmatched_queue.pop_front() {
                self.explore(right);
            } else if let Some(idx) = self.decided.iter().position(|done| !done) {
                self.unmatched_queue.push_back(NodeId(idx));
            } else {
                break;
            }
        }

        Correspondence {
            matched: self.matched,
            decisions: self.decisions,
            statistics: self.statistics,
            records: self.records,
            scores: self.scores,
        }
    }

    /// Follow the outgoing edges of a matched pair.
    fn extend(&mut self, left: NodeId, right: NodeId) {
        if self.extended[right.0] {
            return;
        }
        self.extended[right.0] = true;

        let edges: Vec<_> = self.incoming.outgoing_edges(right).copied().collect();
        for edge in edges {
            if self.decided[edge.to.0] {
                continue;
            }
            if !edge.kind.is_deterministic() {
                self.indirect_queue.push_back(PendingIndirect {
                    left_parent: left,
                    child: edge.to,
                    kind: edge.kind,
                });
                continue;
            }

            self.statistics.direct_attempts += 1;
            let candidates = self.child_candidates(left, edge.to, edge.kind, Some(edge.ordinal));
            match candidates.as_slice() {
                [] => self.unmatched_queue.push_back(edge.to),
                [only] => {
                    self.statistics.direct_matches += 1;
                    let only = *only;
                    self.decide(
                        edge.to,
                        Some(only),
                        MatchTier::Pure,
                        0,
                        MatchingType::DirectEdge,
                        &candidates,
                    );
                }
                _ => self.resolve_collision(edge.to, candidates),
            }
        }
    }

    /// Resolve an indirect-class edge against the targets of the matched parent.
    fn speculate(&mut self, pending: PendingIndirect) {
        if self.decided[pending.child.0] {
            return;
        }

        self.statistics.indirect_attempts += 1;
        let candidates = self.child_candidates(pending.left_parent, pending.child, pending.kind, None);
        match candidates.as_slice() {
            [] => self.unmatched_queue.push_back(pending.child),
            [only] => {
                self.statistics.indirect_matches += 1;
                let only = *only;
                self.decide(
                    pending.child,
                    Some(only),
                    MatchTier::Context,
                    0,
                    MatchingType::IndirectEdge,
                    &candidates,
                );
            }
            _ => self.resolve_collision(pending.child, candidates),
        }
    }

    /// Match a node with no usable parent by hash, then by context on collision.
    fn explore(&mut self, right: NodeId) {
        if self.decided[right.0] {
            return;
        }

        self.statistics.hash_attempts += 1;
        let node = self.incoming.node(right);
        let candidates: Vec<NodeId> = self
            .baseline
            .lookup_by_hash(node.hash())
            .into_iter()
            .filter(|candidate| self.is_viable(*candidate, right))
            .collect();

        match candidates.as_slice() {
            [] => self.decide(right, None, MatchTier::Pure, 0, MatchingType::Unmatched, &[]),
            [only] => {
                self.statistics.pure_matches += 1;
                let only = *only;
                self.decide(
                    right,
                    Some(only),
                    MatchTier::Pure,
                    0,
                    MatchingType::PureHash,
                    &candidates,
                );
            }
            _ => self.resolve_collision(right, candidates),
        }
    }

    fn resolve_collision(&mut self, right: NodeId, candidates: Vec<NodeId>) {
        self.statistics.context_attempts += 1;
        let sink = if self.record { Some(&mut self.scores) } else { None };
        let resolution = self.context.resolve(right, &candidates, &self.matched, sink);
        match resolution {
            ContextResolution::Selected { node, depth } => {
                self.statistics.context_matches += 1;
                self.decide(
                    right,
                    Some(node),
                    MatchTier::Context,
                    depth,
                    MatchingType::ContextCollision,
                    &candidates,
                );
            }
            ContextResolution::Tied { depth } => {
                self.statistics.context_ties += 1;
                self.decide(right, None, MatchTier::Context, depth, MatchingType::Unmatched, &candidates);
            }
            ContextResolution::NoAgreement { depth } => {
                self.decide(right, None, MatchTier::Context, depth, MatchingType::Unmatched, &candidates);
            }
        }
    }

    /// Targets of `left_parent` that could stand for incoming node `child`.
    fn child_candidates(
        &self,
        left_parent: NodeId,
        child: NodeId,
        kind: EdgeType,
        ordinal: Option<u32>,
    ) -> Vec<NodeId> {
        let mut candidates: Vec<NodeId> = self
            .baseline
            .outgoing_edges(left_parent)
            .filter(|edge| edge.kind == kind && ordinal.map_or(true, |ord| edge.ordinal == ord))
            .map(|edge| edge.to)
            .filter(|candidate| self.is_viable(*candidate, child))
            .collect();
        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }

    /// Unclaimed baseline node with the same hash, kind and module as `right`.
    fn is_viable(&self, candidate: NodeId, right: NodeId) -> bool {
        let left = self.baseline.node(candidate);
        let right = self.incoming.node(right);
        !self.taken.contains(&candidate)
            && left.hash() == right.hash()
            && left.kind() == right.kind()
            && left.module() == right.module()
    }

    fn decide(
        &mut self,
        right: NodeId,
        chosen: Option<NodeId>,
        tier: MatchTier,
        depth: u32,
        matching: MatchingType,
        candidates: &[NodeId],
    ) {
        self.decided[right.0] = true;
        self.decisions.push(NodeDecision { incoming: right, matched: chosen, tier, depth, matching });

        match chosen {
            Some(left) => {
                self.matched[right.0] = Some(left);
                self.taken.insert(left);
                self.match_queue.push_back((left, right));
            }
            None => {
                self.statistics.unmatched += 1;
                let children: Vec<NodeId> =
                    self.incoming.outgoing_edges(right).map(|edge| edge.to).collect();
                for child in children {
                    if !self.decided[child.0] {
                        self.unmatched_queue.push_back(child);
                    }
                }
            }
        }

        if self.record {
            let baseline = self.baseline;
            let record = MatchRecord {
                depth,
                incoming: self.incoming.node(right).key(),
                candidates: candidates.iter().map(|id| baseline.node(*id).key()).collect::<Vec<NodeKey>>(),
                chosen: chosen.map(|id| baseline.node(id).key()),
                matching,
            };
            self.records.push(record);
        }
    }
}
