use cfi_merge_core::graph::{
    EdgeType, ExecutionGraph, Graph, GraphError, MergedClusterGraph, MetaNodeType, NodeId, NodeSpec,
};

fn block(graph: &mut Graph, hash: u64, tag: u64) -> NodeId {
    graph.add_node(NodeSpec::new(hash, "app", MetaNodeType::Normal).with_tag(tag))
}

#[test]
fn edges_are_visible_from_both_endpoints() {
    let mut graph = Graph::new();
    let a = block(&mut graph, 0xa, 0x10);
    let b = block(&mut graph, 0xb, 0x20);
    graph.add_edge(a, b, EdgeType::Direct, 1).expect("add edge");

    let out: Vec<_> = graph.outgoing_edges(a).collect();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to, b);
    assert_eq!(out[0].ordinal, 1);

    let incoming: Vec<_> = graph.incoming_edges(b).collect();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].from, a);
    assert!(graph.find_edge(a, b).is_some());
    assert!(graph.find_edge(b, a).is_none());
}

#[test]
fn edge_to_missing_node_is_rejected() {
    let mut graph = Graph::new();
    let a = block(&mut graph, 0xa, 0);
    let err = graph.add_edge(a, NodeId(5), EdgeType::Direct, 0).unwrap_err();
    assert_eq!(err, GraphError::UnknownNode { node: 5, node_count: 1 });
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn second_call_continuation_is_rejected() {
    let mut graph = Graph::new();
    let call = block(&mut graph, 0x1, 0x0);
    let after = block(&mut graph, 0x2, 0x8);
    let other = block(&mut graph, 0x3, 0x10);
    graph.add_edge(call, after, EdgeType::CallContinuation, 0).expect("first continuation");

    let err = graph.add_edge(call, other, EdgeType::CallContinuation, 0).unwrap_err();
    assert!(err.to_string().contains("call continuation"), "unexpected error: {err}");
    assert_eq!(graph.continuation_edge(call).map(|edge| edge.to), Some(after));
}

#[test]
fn find_by_tag_skips_boundary_nodes() {
    let mut graph = Graph::new();
    let body = graph.add_node(NodeSpec::new(0x5, "app", MetaNodeType::Normal).with_tag(0x40).with_version(2));
    graph.add_node(NodeSpec::new(0x6, "app", MetaNodeType::ModuleEntry));

    assert_eq!(graph.find_by_tag("app", 0x40, 2), Some(body));
    assert_eq!(graph.find_by_tag("app", 0x40, 0), None);
    assert_eq!(graph.find_by_tag("app", 0x0, 0), None);
}

#[test]
fn trampoline_regions_group_connected_trampolines() {
    let mut graph = Graph::new();
    let t1 = graph.add_node(NodeSpec::new(0x1, "app", MetaNodeType::Trampoline).with_tag(1));
    let n = block(&mut graph, 0x2, 2);
    let t2 = graph.add_node(NodeSpec::new(0x3, "app", MetaNodeType::Trampoline).with_tag(3));
    let t3 = graph.add_node(NodeSpec::new(0x4, "app", MetaNodeType::Trampoline).with_tag(4));
    graph.add_edge(t1, n, EdgeType::Direct, 0).expect("edge");
    graph.add_edge(n, t2, EdgeType::Indirect, 0).expect("edge");
    graph.add_edge(t3, t2, EdgeType::Direct, 0).expect("edge");

    let regions = graph.trampoline_regions();
    assert_eq!(regions, vec![vec![t1], vec![t2, t3]]);
}

#[test]
fn json_round_trip_preserves_digest_and_instances() {
    let mut execution = ExecutionGraph::new("app");
    let a = block(&mut execution.graph, 0xcafe, 0x100);
    let b = block(&mut execution.graph, 0xcafe, 0x200);
    execution.graph.add_edge(a, b, EdgeType::Indirect, 0).expect("edge");

    let json = serde_json::to_string(&execution).expect("serialize");
    let back: ExecutionGraph = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(back.module, "app");
    assert_eq!(back.graph.digest(), execution.graph.digest());
    assert_eq!(back.graph.node(b).instance(), 1);
}

#[test]
fn invalid_graph_json_is_rejected() {
    let json = r#"{"module":"app","graph":{"nodes":[],"edges":[{"from":0,"to":1,"kind":"direct","ordinal":0}]}}"#;
    let err = serde_json::from_str::<ExecutionGraph>(json).unwrap_err();
    assert!(err.to_string().contains("does not exist"), "unexpected error: {err}");
}

#[test]
fn cluster_digest_tracks_modules() {
    let mut cluster = MergedClusterGraph::new("suite");
    let before = cluster.digest();
    cluster.modules.insert("libfoo.so".into());
    assert_ne!(cluster.digest(), before);
    assert!(cluster.contains_module("libfoo.so"));
}

#[test]
fn version_matches_package() {
    assert_eq!(cfi_merge_core::version(), env!("CARGO_PKG_VERSION"));
}
