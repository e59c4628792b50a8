use std::collections::HashSet;

use crate::graph::{Graph, NodeId};
use crate::merge::recorder::ContextScore;

/// Result of comparing the neighborhoods of several collision candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextResolution {
    /// One candidate agreed strictly better than every other at `depth`.
    Selected { node: NodeId, depth: u32 },
    /// Two or more candidates stayed equally strong through the depth bound.
    Tied { depth: u32 },
    /// No candidate's neighborhood agreed with the incoming node.
    NoAgreement { depth: u32 },
}

/// Depth-bounded neighborhood comparison between baseline and incoming nodes.
pub(crate) struct ContextMatcher<'a> {
    baseline: &'a Graph,
    incoming: &'a Graph,
    max_depth: u32,
}

impl<'a> ContextMatcher<'a> {
    pub(crate) fn new(baseline: &'a Graph, incoming: &'a Graph, max_depth: u32) -> Self {
        Self { baseline, incoming, max_depth }
    }

    /// Pick the candidate whose neighborhood agrees with `right` at the shallowest depth.
    ///
    /// Depth grows from 1 to the bound. At each depth the unique best positive
    /// score wins. A best score of zero or less ends the search. A tie for the
    /// best positive score moves on to the next depth, and a tie that survives
    /// the bound is reported as [`ContextResolution::Tied`], never guessed.
    pub(crate) fn resolve(
        &self,
        right: NodeId,
        candidates: &[NodeId],
        matched: &[Option<NodeId>],
        mut scores: Option<&mut Vec<ContextScore>>,
    ) -> ContextResolution {
        if candidates.is_empty() || self.max_depth == 0 {
            return ContextResolution::NoAgreement { depth: 0 };
        }

        for depth in 1..=self.max_depth {
            let mut best: Option<(i64, NodeId)> = None;
            let mut tied = false;

            for &candidate in candidates {
                let mut seen = HashSet::new();
                let score = self.similarity(candidate, right, depth, matched, &mut seen);
                if let Some(sink) = scores.as_mut() {
                    sink.push(ContextScore {
                        depth,
                        incoming: self.incoming.node(right).key(),
                        candidate: self.baseline.node(candidate).key(),
                        score,
                    });
                }
                match best {
                    Some((top, _)) if score < top => {}
                    Some((top, _)) if score == top => tied = true,
                    _ => {
                        best = Some((score, candidate));
                        tied = false;
                    }
                }
            }

            match best {
                Some((score, node)) if score > 0 && !tied => {
                    log::debug!(
                        "Context match for {} selected {} at depth {depth}",
                        self.incoming.node(right).key(),
                        self.baseline.node(node).key()
                    );
                    return ContextResolution::Selected { node, depth };
                }
                Some((score, _)) if score <= 0 => return ContextResolution::NoAgreement { depth },
                _ => {}
            }
        }

        log::debug!(
            "Context match for {} tied among {} candidates at depth {}",
            self.incoming.node(right).key(),
            candidates.len(),
            self.max_depth
        );
        ContextResolution::Tied { depth: self.max_depth }
    }

    /// Agreement between `left` (baseline) and `right` (incoming) within `depth` hops.
    ///
    /// Each successor of `right` reached by an edge with the same type, ordinal
    /// and target hash on the `left` side scores one point plus its own
    /// agreement one level down, and one more when that pair is already matched.
    /// A deterministic successor whose counterpart has a different hash means
    /// the two blocks cannot be the same, scored `-1`. Predecessors with an equal
    /// hash add one point each, plus one when the predecessor is already matched
    /// to a parent of `left`.
    fn similarity(
        &self,
        left: NodeId,
        right: NodeId,
        depth: u32,
        matched: &[Option<NodeId>],
        seen: &mut HashSet<(NodeId, NodeId)>,
    ) -> i64 {
        if depth == 0 || !seen.insert((left, right)) {
            return 0;
        }

        let mut score = 0;
        for right_edge in self.incoming.outgoing_edges(right) {
            let right_hash = self.incoming.node(right_edge.to).hash();
            let mut best: Option<i64> = None;
            let mut contradicted = false;

            for left_edge in self
                .baseline
                .outgoing_edges(left)
                .filter(|edge| edge.kind == right_edge.kind && edge.ordinal == right_edge.ordinal)
            {
                if self.baseline.node(left_edge.to).hash() != right_hash {
                    contradicted |= right_edge.kind.is_deterministic();
                    continue;
                }
                let mut agreement =
                    1 + self.similarity(left_edge.to, right_edge.to, depth - 1, matched, seen).max(0);
                if matched.get(right_edge.to.0).copied().flatten() == Some(left_edge.to) {
                    agreement += 1;
                }
                best = Some(best.map_or(agreement, |top| top.max(agreement)));
            }

            match best {
                Some(agreement) => score += agreement,
                None if contradicted => return -1,
                None => {}
            }
        }

        for right_edge in self.incoming.incoming_edges(right) {
            let parent_hash = self.incoming.node(right_edge.from).hash();
            let agrees = self.baseline.incoming_edges(left).any(|left_edge| {
                left_edge.kind == right_edge.kind
                    && left_edge.ordinal == right_edge.ordinal
                    && self.baseline.node(left_edge.from).hash() == parent_hash
            });
            if !agrees {
                continue;
            }
            score += 1;
            let parent_matched = matched
                .get(right_edge.from.0)
                .copied()
                .flatten()
                .is_some_and(|parent| self.baseline.find_edge(parent, left).is_some());
            if parent_matched {
                score += 1;
            }
        }

        score
    }
}
