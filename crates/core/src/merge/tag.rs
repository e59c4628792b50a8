use std::collections::{BTreeMap, HashSet};

use crate::classify::MatchTier;
use crate::graph::{EdgeType, Graph, NodeId};
use crate::merge::matcher::Correspondence;
use crate::merge::recorder::{MatchRecord, MatchingType};
use crate::merge::{MergeStatistics, NodeDecision};

/// Matching pass keyed by module-relative position instead of content.
///
/// Every incoming node is looked up at its `(module, tag, version)` in the
/// baseline. Boundary nodes have no position and are looked up by hash. A
/// found block is only accepted when it is the same block: same hash, same
/// kind, and no ordinal where the two disagree on the edge type.
pub(crate) struct TagSession<'a> {
    baseline: &'a Graph,
    incoming: &'a Graph,
    record: bool,
    taken: HashSet<NodeId>,
}

impl<'a> TagSession<'a> {
    pub(crate) fn new(baseline: &'a Graph, incoming: &'a Graph, record: bool) -> Self {
        Self { baseline, incoming, record, taken: HashSet::new() }
    }

    pub(crate) fn run(mut self) -> Correspondence {
        let count = self.incoming.node_count();
        let mut matched = vec![None; count];
        let mut decisions = Vec::with_capacity(count);
        let mut statistics = MergeStatistics::default();
        let mut records = Vec::new();

        for (right, node) in self.incoming.nodes() {
            let candidate = if node.kind().is_boundary() {
                statistics.hash_attempts += 1;
                self.baseline
                    .lookup_by_hash(node.hash())
                    .into_iter()
                    .find(|left| !self.taken.contains(left) && self.same_block(*left, right))
            } else {
                self.baseline.find_by_tag(node.module(), node.tag(), node.version())
            };

            let chosen = match candidate {
                Some(left) if !self.taken.contains(&left) && self.same_block(left, right) => {
                    statistics.tag_matches += 1;
                    self.taken.insert(left);
                    Some(left)
                }
                Some(left) => {
                    log::debug!(
                        "Position of {} holds a different block {} in the baseline",
                        node.key(),
                        self.baseline.node(left).key()
                    );
                    statistics.tag_mismatches += 1;
                    None
                }
                None => None,
            };
            if chosen.is_none() {
                statistics.unmatched += 1;
            }

            matched[right.0] = chosen;
            let matching = if chosen.is_some() { MatchingType::Tag } else { MatchingType::Unmatched };
            decisions.push(NodeDecision {
                incoming: right,
                matched: chosen,
                tier: MatchTier::Pure,
                depth: 0,
                matching,
            });

            if self.record {
                records.push(MatchRecord {
                    depth: 0,
                    incoming: node.key(),
                    candidates: candidate.map(|id| self.baseline.node(id).key()).into_iter().collect(),
                    chosen: chosen.map(|id| self.baseline.node(id).key()),
                    matching,
                });
            }
        }

        Correspondence { matched, decisions, statistics, records, scores: Vec::new() }
    }

    fn same_block(&self, left: NodeId, right: NodeId) -> bool {
        let l = self.baseline.node(left);
        let r = self.incoming.node(right);
        l.hash() == r.hash()
            && l.kind() == r.kind()
            && l.module() == r.module()
            && compatible_edges(self.baseline, left, self.incoming, right)
    }
}

/// No ordinal is used with one edge type on one side and another on the other.
fn compatible_edges(left_graph: &Graph, left: NodeId, right_graph: &Graph, right: NodeId) -> bool {
    let mut kinds: BTreeMap<u32, EdgeType> = BTreeMap::new();
    for edge in left_graph.outgoing_edges(left) {
        kinds.entry(edge.ordinal).or_insert(edge.kind);
    }
    right_graph
        .outgoing_edges(right)
        .all(|edge| kinds.get(&edge.ordinal).map_or(true, |kind| *kind == edge.kind))
}
