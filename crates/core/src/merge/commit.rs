use std::collections::HashSet;

use crate::graph::{Edge, EdgeId, EdgeType, Graph, NodeId, NodeSpec};
use crate::merge::MergeFailure;

/// Where an edge endpoint will live once the plan is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Endpoint {
    Baseline(NodeId),
    /// Index into [`MergePlan::nodes`].
    Staged(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PlannedEdge {
    from: Endpoint,
    to: Endpoint,
    kind: EdgeType,
    ordinal: u32,
}

/// Every change a merge will make, computed without touching the baseline.
#[derive(Debug, Default)]
pub(crate) struct MergePlan {
    /// Incoming nodes to copy, paired with their incoming ids.
    nodes: Vec<(NodeId, NodeSpec)>,
    edges: Vec<PlannedEdge>,
    /// Incoming edges already present in the baseline.
    pub existing_edges: usize,
}

/// Ids created in the baseline by [`apply`].
#[derive(Debug, Default)]
pub(crate) struct Applied {
    /// `(incoming id, baseline id)` for every copied node.
    pub nodes: Vec<(NodeId, NodeId)>,
    pub edges: Vec<EdgeId>,
}

/// Stage the nodes and edges that `incoming` adds to `baseline`.
///
/// Fails when an incoming edge joins two matched nodes that the baseline
/// already joins with a different edge type or ordinal. A second call
/// continuation out of a node that already has one is dropped.
pub(crate) fn plan(
    baseline: &Graph,
    incoming: &Graph,
    matched: &[Option<NodeId>],
) -> Result<MergePlan, MergeFailure> {
    let mut plan = MergePlan::default();
    let mut endpoints = Vec::with_capacity(incoming.node_count());

    for (id, node) in incoming.nodes() {
        match matched.get(id.0).copied().flatten() {
            Some(left) => endpoints.push(Endpoint::Baseline(left)),
            None => {
                endpoints.push(Endpoint::Staged(plan.nodes.len()));
                let spec = NodeSpec::new(node.hash(), node.module(), node.kind())
                    .with_tag(node.tag())
                    .with_version(node.version());
                plan.nodes.push((id, spec));
            }
        }
    }

    let mut planned = HashSet::new();
    let mut continuations: HashSet<Endpoint> = HashSet::new();

    for (_, edge) in incoming.edges() {
        let from = endpoints[edge.from.0];
        let to = endpoints[edge.to.0];

        if let (Endpoint::Baseline(left_from), Endpoint::Baseline(left_to)) = (from, to) {
            let existing: Vec<&Edge> =
                baseline.outgoing_edges(left_from).filter(|e| e.to == left_to).collect();
            if existing.iter().any(|e| e.kind == edge.kind && e.ordinal == edge.ordinal) {
                plan.existing_edges += 1;
                continue;
            }
            if let Some(conflict) = existing.first() {
                return Err(MergeFailure::EdgeConflict {
                    from: baseline.node(left_from).key(),
                    to: baseline.node(left_to).key(),
                    existing_kind: conflict.kind,
                    existing_ordinal: conflict.ordinal,
                    incoming_kind: edge.kind,
                    incoming_ordinal: edge.ordinal,
                });
            }
        }

        if edge.kind == EdgeType::CallContinuation {
            let baseline_has = match from {
                Endpoint::Baseline(left) => baseline.continuation_edge(left).is_some(),
                Endpoint::Staged(_) => false,
            };
            if baseline_has || !continuations.insert(from) {
                log::debug!(
                    "Dropping extra call continuation from {}",
                    incoming.node(edge.from).key()
                );
                continue;
            }
        }

        let staged = PlannedEdge { from, to, kind: edge.kind, ordinal: edge.ordinal };
        if planned.insert(staged) {
            plan.edges.push(staged);
        }
    }

    Ok(plan)
}

/// Write a plan into the baseline. Cannot fail: [`plan`] already validated it.
pub(crate) fn apply(baseline: &mut Graph, plan: MergePlan) -> Applied {
    let mut applied = Applied::default();
    let mut staged_ids = Vec::with_capacity(plan.nodes.len());

    for (incoming_id, spec) in plan.nodes {
        let id = baseline.add_node(spec);
        staged_ids.push(id);
        applied.nodes.push((incoming_id, id));
    }

    let resolve = |endpoint: Endpoint| match endpoint {
        Endpoint::Baseline(id) => id,
        Endpoint::Staged(idx) => staged_ids[idx],
    };

    for edge in plan.edges {
        let edge = Edge {
            from: resolve(edge.from),
            to: resolve(edge.to),
            kind: edge.kind,
            ordinal: edge.ordinal,
        };
        applied.edges.push(baseline.push_edge(edge));
    }

    applied
}
