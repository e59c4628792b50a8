use std::collections::BTreeMap;

use cfi_merge_core::graph::{EdgeType, MetaNodeType};
use cfi_merge_core::report::{
    calculate_precedence, quantize, ExecutionReport, ModuleEventFrequencies, NodeSummary,
    ProgramEventFrequencies, ReportEntry, RiskConfig, NEW_MODULE_RISK,
};

fn summary(module: &str, kind: MetaNodeType, tag: u64) -> NodeSummary {
    NodeSummary { module: module.into(), kind, hash: 0x1234, tag }
}

fn abnormal_return(module: &str, tag: u64) -> ReportEntry {
    ReportEntry::AbnormalReturn { node: summary(module, MetaNodeType::Return, tag) }
}

#[test]
fn precedence_uses_log_scale_with_floor() {
    assert!((calculate_precedence(8, 8) - 0.5).abs() < 1e-12);
    assert!((calculate_precedence(10, 1000) - 1.0).abs() < 1e-12);
    let floor = calculate_precedence(100, 1);
    assert!((floor - 0.01 / 4.0).abs() < 1e-12, "floor was {floor}");
    assert_eq!(calculate_precedence(100, 0), floor);
    assert_eq!(quantize(0.5), 500);
    assert_eq!(quantize(0.0004), 0);
    assert_eq!(quantize(0.0006), 1);
}

#[test]
fn abnormal_return_index_combines_program_and_module_terms() {
    let risk = RiskConfig::default();
    let mut program = ProgramEventFrequencies::new();
    program.abnormal_returns = 8;

    let without_module = abnormal_return("app", 0x10).risk_index(&program, None, &risk);
    assert_eq!(without_module, 4000);

    let module = ModuleEventFrequencies { abnormal_returns: 3, ..Default::default() };
    let with_module = abnormal_return("app", 0x10).risk_index(&program, Some(&module), &risk);
    assert_eq!(with_module, 2000);

    let empty_module = ModuleEventFrequencies::default();
    let zero_count = abnormal_return("app", 0x10).risk_index(&program, Some(&empty_module), &risk);
    assert_eq!(zero_count, without_module);
}

#[test]
fn indirect_edge_index_is_keyed_by_target() {
    let risk = RiskConfig::default();
    let mut program = ProgramEventFrequencies::new();
    program.indirect_targets = BTreeMap::from([(0x40, 20)]);
    let module = ModuleEventFrequencies { indirect_targets: BTreeMap::from([(0x40, 5)]), ..Default::default() };

    let known = ReportEntry::IndirectEdge {
        from: summary("app", MetaNodeType::Normal, 0x10),
        to: summary("app", MetaNodeType::Normal, 0x40),
        ordinal: 0,
    };
    assert_eq!(known.risk_index(&program, Some(&module), &risk), 2000);

    let rare = ReportEntry::IndirectEdge {
        from: summary("app", MetaNodeType::Normal, 0x10),
        to: summary("app", MetaNodeType::Normal, 0x80),
        ordinal: 0,
    };
    assert!(rare.risk_index(&program, Some(&module), &risk) > 2000);
}

#[test]
fn standalone_index_has_floor_and_halves_on_expansion() {
    let risk = RiskConfig::default();
    let mut program = ProgramEventFrequencies::new();
    program.standalones = 200;
    let module = ModuleEventFrequencies { standalones: 50, ..Default::default() };

    let fresh = ReportEntry::NewStandalone { module: "app".into(), node_count: 4, expanded_from: 0 };
    let grown = ReportEntry::NewStandalone { module: "app".into(), node_count: 4, expanded_from: 2 };
    assert_eq!(fresh.risk_index(&program, Some(&module), &risk), 500);
    assert_eq!(grown.risk_index(&program, Some(&module), &risk), 250);
    assert_eq!(fresh.risk_index(&program, None, &risk), 750);

    program.standalones = 40_000;
    let common = ModuleEventFrequencies { standalones: 2_500, ..Default::default() };
    assert_eq!(fresh.risk_index(&program, Some(&common), &risk), 20);
    assert_eq!(grown.risk_index(&program, Some(&common), &risk), 10);
}

#[test]
fn new_module_and_singleton_have_fixed_indices() {
    let risk = RiskConfig::default();
    let program = ProgramEventFrequencies::new();
    let entry = ReportEntry::NewModule { module: "libnew.so".into() };
    assert_eq!(entry.risk_index(&program, None, &risk), NEW_MODULE_RISK);

    let singleton = ReportEntry::JitSingleton { node: summary("jit", MetaNodeType::Singleton, 0) };
    assert_eq!(singleton.risk_index(&program, None, &risk), 1000);
}

#[test]
fn sorted_report_is_non_increasing_with_description_tie_break() {
    let mut program = ProgramEventFrequencies::new();
    program.standalones = 200;
    program.abnormal_returns = 8;
    let mut report = ExecutionReport::new(&program, RiskConfig::default()).expect("report");
    report.set_current_module("app");

    report.add_entry(ReportEntry::NewStandalone { module: "app".into(), node_count: 3, expanded_from: 0 });
    report.add_entry(ReportEntry::NewModule { module: "zeta.so".into() });
    report.add_entry(abnormal_return("app", 0x20));
    report.add_entry(ReportEntry::NewModule { module: "alpha.so".into() });
    report.add_entry(abnormal_return("app", 0x10));
    report.sort();

    let indices: Vec<u32> = report.entries().iter().map(|e| e.risk_index).collect();
    assert!(indices.windows(2).all(|w| w[0] >= w[1]), "not sorted: {indices:?}");

    let lines = report.lines();
    assert_eq!(lines[0], "4000 Abnormal return app(0x10)");
    assert_eq!(lines[1], "4000 Abnormal return app(0x20)");
    assert_eq!(lines[2], "1000 Untrusted module alpha.so");
    assert_eq!(lines[3], "1000 Untrusted module zeta.so");
    assert_eq!(lines[4], "0750 Dynamic standalone of size 3 nodes owned by app");
}

#[test]
fn write_to_emits_one_line_per_entry() {
    let program = ProgramEventFrequencies::new();
    let mut report = ExecutionReport::new(&program, RiskConfig::default()).expect("report");
    report.add_entry(ReportEntry::NewModule { module: "libfoo.so".into() });

    let mut out = Vec::new();
    report.write_to(&mut out).expect("write report");
    assert_eq!(String::from_utf8(out).expect("utf8"), "1000 Untrusted module libfoo.so\n");
}

#[test]
fn medians_below_two_are_rejected() {
    let program = ProgramEventFrequencies::new();
    let mut risk = RiskConfig::default();
    risk.indirect_edges.module = 1;
    let err = ExecutionReport::new(&program, risk).unwrap_err();
    assert!(err.to_string().contains("indirect_edges.module"), "unexpected error: {err}");
}

#[test]
fn gencode_edges_score_flat_and_name_the_action() {
    let risk = RiskConfig::default();
    let mut program = ProgramEventFrequencies::new();
    program.abnormal_returns = 500;

    let perm = ReportEntry::GencodeEdge {
        from: summary("libjit.so", MetaNodeType::Normal, 0x40),
        to: summary("libjit.so", MetaNodeType::Trampoline, 0x80),
        edge: EdgeType::GencodePerm,
        ordinal: 1,
    };
    assert_eq!(perm.risk_index(&program, None, &risk), 1000);
    assert_eq!(
        perm.describe(),
        "Gencode chmod libjit.so(0x40) -1-> Dynamic standalone libjit.so(0x80)"
    );

    let write = ReportEntry::GencodeEdge {
        from: summary("libjit.so", MetaNodeType::Normal, 0x40),
        to: summary("libjit.so", MetaNodeType::Normal, 0x44),
        edge: EdgeType::GencodeWrite,
        ordinal: 0,
    };
    assert!(write.describe().starts_with("Gencode write "));
}
