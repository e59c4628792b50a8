use cfi_merge_core::classify::{
    classify, BaselinePresence, MatchDecision, MatchOutcome, MatchTier, OutcomeTally,
};
use cfi_merge_core::graph::{Graph, MetaNodeType, NodeId, NodeSpec};

fn baseline() -> (Graph, NodeId, NodeId) {
    let mut graph = Graph::new();
    let a = graph.add_node(NodeSpec::new(0xaa, "app", MetaNodeType::Normal).with_tag(0x10));
    let b = graph.add_node(NodeSpec::new(0xaa, "app", MetaNodeType::Normal).with_tag(0x20));
    (graph, a, b)
}

fn decision(presence: BaselinePresence, chosen: Option<NodeId>, tier: MatchTier) -> MatchDecision {
    MatchDecision { hash: 0xaa, presence, chosen, tier }
}

#[test]
fn every_combination_maps_to_one_outcome() {
    let (graph, a, b) = baseline();
    use BaselinePresence::{Absent, Present, Unknown};
    use MatchTier::{Context, Pure};

    let cases = [
        (decision(Unknown, Some(a), Pure), MatchOutcome::Unknown),
        (decision(Unknown, None, Context), MatchOutcome::Unknown),
        (decision(Present(a), Some(a), Pure), MatchOutcome::PureExistingCorrectMatch),
        (decision(Present(a), Some(b), Pure), MatchOutcome::PureExistingMismatch),
        (decision(Present(a), None, Pure), MatchOutcome::PureExistingUnfoundMismatch),
        (decision(Absent, None, Pure), MatchOutcome::PureNonExistingCorrectMatch),
        (decision(Absent, Some(a), Pure), MatchOutcome::PureNonExistingMismatch),
        (decision(Present(b), Some(b), Context), MatchOutcome::ContextExistingCorrectMatch),
        (decision(Present(b), Some(a), Context), MatchOutcome::ContextExistingMismatch),
        (decision(Present(b), None, Context), MatchOutcome::ContextExistingUnfoundMismatch),
        (decision(Absent, None, Context), MatchOutcome::ContextNonExistingCorrectMatch),
        (decision(Absent, Some(b), Context), MatchOutcome::ContextNonExistingMismatch),
    ];

    for (input, expected) in cases {
        assert_eq!(classify(&graph, &input), expected, "for {input:?}");
    }
}

#[test]
fn correctness_and_existence_flags() {
    assert!(MatchOutcome::PureExistingCorrectMatch.is_correct());
    assert!(MatchOutcome::ContextNonExistingCorrectMatch.is_correct());
    assert!(!MatchOutcome::ContextExistingMismatch.is_correct());
    assert!(!MatchOutcome::Unknown.is_correct());

    assert_eq!(MatchOutcome::PureExistingUnfoundMismatch.existed(), Some(true));
    assert_eq!(MatchOutcome::PureNonExistingMismatch.existed(), Some(false));
    assert_eq!(MatchOutcome::Unknown.existed(), None);
    assert_eq!(MatchOutcome::ContextExistingCorrectMatch.to_string(), "context-existing-correct-match");
}

#[test]
#[should_panic(expected = "classifier defect")]
fn choosing_a_node_with_another_hash_is_a_defect() {
    let mut graph = Graph::new();
    let other = graph.add_node(NodeSpec::new(0xbb, "app", MetaNodeType::Normal));
    classify(&graph, &decision(BaselinePresence::Absent, Some(other), MatchTier::Pure));
}

#[test]
#[should_panic(expected = "classifier defect")]
fn choosing_a_missing_node_is_a_defect() {
    let (graph, _, _) = baseline();
    classify(&graph, &decision(BaselinePresence::Absent, Some(NodeId(42)), MatchTier::Context));
}

#[test]
fn tally_counts_and_merges() {
    let mut first = OutcomeTally::new();
    first.record(MatchOutcome::PureExistingCorrectMatch);
    first.record(MatchOutcome::PureExistingCorrectMatch);
    first.record(MatchOutcome::ContextExistingMismatch);

    let mut second = OutcomeTally::new();
    second.record(MatchOutcome::PureNonExistingCorrectMatch);
    second.merge(&first);

    assert_eq!(second.count(MatchOutcome::PureExistingCorrectMatch), 2);
    assert_eq!(second.total(), 4);
    assert_eq!(second.correct(), 3);
    assert_eq!(second.count(MatchOutcome::Unknown), 0);
}
