use std::collections::{BTreeMap, HashSet};

use crate::graph::{Edge, Graph, MetaNodeType, NodeId};

/// Structural comparison of dynamically generated code against the baseline.
///
/// Generated code rarely lands at the same address twice, so its blocks are
/// compared by shape instead: a pair of blocks is compatible when the hashes
/// agree and, per outgoing ordinal, the edges agree in type and lead to
/// compatible targets. Deterministic edges are followed down to the depth
/// bound; indirect-class edges only need a hash-equal target.
pub(crate) struct SubgraphCompatibility<'a> {
    incoming: &'a Graph,
    baseline: &'a Graph,
    visited: HashSet<NodeId>,
}

impl<'a> SubgraphCompatibility<'a> {
    pub(crate) fn new(incoming: &'a Graph, baseline: &'a Graph) -> Self {
        Self { incoming, baseline, visited: HashSet::new() }
    }

    /// Whether some baseline standalone block of the same module is compatible with `node`.
    pub(crate) fn has_compatible_standalone(&mut self, node: NodeId, depth: u32) -> bool {
        let incoming = self.incoming.node(node);
        let candidates: Vec<NodeId> = self
            .baseline
            .lookup_by_hash(incoming.hash())
            .into_iter()
            .filter(|id| {
                let candidate = self.baseline.node(*id);
                candidate.kind() == MetaNodeType::Trampoline && candidate.module() == incoming.module()
            })
            .collect();

        candidates.into_iter().any(|candidate| {
            self.visited.clear();
            self.is_compatible(node, candidate, depth)
        })
    }

    fn is_compatible(&mut self, left: NodeId, right: NodeId, depth: u32) -> bool {
        if !self.visited.insert(left) {
            return true;
        }
        if self.incoming.node(left).hash() != self.baseline.node(right).hash() {
            self.visited.remove(&left);
            return false;
        }
        if depth == 0 {
            return true;
        }

        let left_by_ordinal = by_ordinal(self.incoming, left);
        let right_by_ordinal = by_ordinal(self.baseline, right);

        for (ordinal, left_edges) in &left_by_ordinal {
            let Some(right_edges) = right_by_ordinal.get(ordinal) else {
                continue;
            };
            let (Some(first_left), Some(first_right)) = (left_edges.first(), right_edges.first()) else {
                continue;
            };
            if first_left.kind != first_right.kind {
                log::debug!(
                    "Standalone block {} uses ordinal {ordinal} for {} here but {} in the baseline",
                    self.incoming.node(left).key(),
                    first_left.kind.as_str(),
                    first_right.kind.as_str()
                );
                self.visited.remove(&left);
                return false;
            }

            let follow = first_left.kind.is_deterministic();
            let agreed = left_edges.iter().any(|left_edge| {
                right_edges.iter().any(|right_edge| {
                    self.incoming.node(left_edge.to).hash() == self.baseline.node(right_edge.to).hash()
                        && (!follow || self.is_compatible(left_edge.to, right_edge.to, depth - 1))
                })
            });
            if !agreed {
                self.visited.remove(&left);
                return false;
            }
        }

        true
    }
}

fn by_ordinal(graph: &Graph, node: NodeId) -> BTreeMap<u32, Vec<Edge>> {
    let mut grouped: BTreeMap<u32, Vec<Edge>> = BTreeMap::new();
    for edge in graph.outgoing_edges(node) {
        grouped.entry(edge.ordinal).or_default().push(*edge);
    }
    grouped
}
