use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use cfi_merge_core::db::{BaselineDb, MergeRunStatus, WorkspaceLayout};
use cfi_merge_core::dist::MAIN_PROGRAM;
use cfi_merge_core::graph::{EdgeType, ExecutionGraph, MetaNodeType, NodeSpec};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

fn init_workspace(root: &Path) {
    cargo_bin_cmd!("cfi-merge")
        .arg("init-workspace")
        .arg("--root")
        .arg(root)
        .arg("--name")
        .arg("TestWorkspace")
        .assert()
        .success()
        .stdout(contains("Initialized CFI merge workspace:"));
}

/// Two blocks joined by `kind`, written as a graph JSON file under `root`.
fn write_graph(root: &Path, file: &str, module: &str, kind: EdgeType) -> PathBuf {
    let mut execution = ExecutionGraph::new(module);
    let a = execution.graph.add_node(NodeSpec::new(0x10, module, MetaNodeType::Normal).with_tag(0x10));
    let b = execution.graph.add_node(NodeSpec::new(0x20, module, MetaNodeType::Normal).with_tag(0x20));
    execution.graph.add_edge(a, b, kind, 0).expect("edge");

    let path = root.join(file);
    fs::write(&path, serde_json::to_string_pretty(&execution).expect("serialize")).expect("write graph");
    path
}

fn merge_graph(root: &Path, graph: &Path) -> assert_cmd::assert::Assert {
    cargo_bin_cmd!("cfi-merge")
        .arg("merge")
        .arg("--root")
        .arg(root)
        .arg("--graph")
        .arg(graph)
        .assert()
}

#[test]
fn init_workspace_creates_layout_and_db() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);

    let layout = WorkspaceLayout::new(root);
    assert!(layout.config_path.is_file());
    assert!(layout.db_path.is_file());
    assert!(layout.distributions_dir.is_dir());
    assert!(layout.reports_dir.is_dir());
    assert!(layout.stats_dir.is_dir());

    let output = cargo_bin_cmd!("cfi-merge")
        .arg("workspace-info")
        .arg("--root")
        .arg(root)
        .arg("--json")
        .output()
        .expect("run workspace-info");
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(info["name"], "TestWorkspace");
    assert_eq!(info["engine_version"], cfi_merge_core::version());
    assert_eq!(info["merge"]["max_context_depth"], 3);
    assert_eq!(info["baselines"].as_array().map(Vec::len), Some(0));
}

#[test]
fn init_workspace_uses_current_dir_by_default() {
    let dir = tempdir().expect("tempdir");
    cargo_bin_cmd!("cfi-merge").current_dir(dir.path()).arg("init-workspace").assert().success();

    let config = fs::read_to_string(WorkspaceLayout::new(dir.path()).config_path).expect("read config");
    let name = dir.path().file_name().and_then(|n| n.to_str()).expect("dir name");
    assert!(config.contains(name), "config missing inferred name: {config}");
}

#[test]
fn first_merge_reports_new_module_and_stores_baseline() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let graph = write_graph(root, "app.json", "app", EdgeType::Direct);

    merge_graph(root, &graph)
        .success()
        .stdout(contains("Merged app into <main-program> (new module): 2 new nodes, 1 new edges"))
        .stdout(contains("1000 Untrusted module app"));

    let db = BaselineDb::open(&WorkspaceLayout::new(root).db_path).expect("open db");
    let baseline = db.load_baseline(MAIN_PROGRAM).expect("load").expect("baseline stored");
    assert_eq!(baseline.graph.node_count(), 2);

    cargo_bin_cmd!("cfi-merge")
        .arg("show-baseline")
        .arg("--root")
        .arg(root)
        .arg("--distribution")
        .arg(MAIN_PROGRAM)
        .assert()
        .success()
        .stdout(contains("Nodes: 2"))
        .stdout(contains("direct: 1"));
}

#[test]
fn re_merge_adds_nothing_and_reports_nothing() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let graph = write_graph(root, "app.json", "app", EdgeType::Direct);
    merge_graph(root, &graph).success();
    let db_path = WorkspaceLayout::new(root).db_path;
    let before = BaselineDb::open(&db_path).expect("open db").list_baselines().expect("list");

    merge_graph(root, &graph)
        .success()
        .stdout(contains("0 new nodes, 0 new edges, 2 matched"))
        .stdout(contains("Untrusted module").not());

    let after = BaselineDb::open(&db_path).expect("open db").list_baselines().expect("list");
    assert_eq!(before[0].digest, after[0].digest);
}

#[test]
fn conflicting_merge_is_rejected_and_recorded() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let good = write_graph(root, "good.json", "app", EdgeType::Direct);
    let bad = write_graph(root, "bad.json", "app", EdgeType::CallContinuation);
    merge_graph(root, &good).success();
    let db_path = WorkspaceLayout::new(root).db_path;
    let before = BaselineDb::open(&db_path).expect("open db").list_baselines().expect("list");

    merge_graph(root, &bad)
        .failure()
        .stderr(contains("Rejected merge of app"))
        .stderr(contains("1 of 1 merges were rejected"));

    let db = BaselineDb::open(&db_path).expect("open db");
    let after = db.list_baselines().expect("list");
    assert_eq!(before[0].digest, after[0].digest);

    let runs = db.list_merge_runs(None).expect("runs");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, MergeRunStatus::Merged);
    assert_eq!(runs[1].status, MergeRunStatus::Rejected);
    assert!(runs[1].message.as_deref().unwrap_or_default().contains("CallContinuation"));

    cargo_bin_cmd!("cfi-merge")
        .arg("list-merge-runs")
        .arg("--root")
        .arg(root)
        .assert()
        .success()
        .stdout(contains("[rejected] app -> <main-program>"));
}

#[test]
fn merge_without_inputs_fails() {
    let dir = tempdir().expect("tempdir");
    init_workspace(dir.path());

    cargo_bin_cmd!("cfi-merge")
        .arg("merge")
        .arg("--root")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(contains("Nothing to merge"));
}

#[test]
fn merge_outside_workspace_fails() {
    let dir = tempdir().expect("tempdir");
    let graph = write_graph(dir.path(), "app.json", "app", EdgeType::Direct);

    merge_graph(dir.path(), &graph).failure().stderr(contains("Failed to read workspace config"));
}

#[test]
fn configured_distribution_receives_its_modules() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let layout = WorkspaceLayout::new(root);
    fs::write(layout.distributions_dir.join("system.asd"), "LIBC.SO\n").expect("write asd");
    let graph = write_graph(root, "libc.json", "libc.so", EdgeType::Direct);

    merge_graph(root, &graph).success().stdout(contains("Merged libc.so into system"));

    let output = cargo_bin_cmd!("cfi-merge")
        .arg("list-distributions")
        .arg("--root")
        .arg(root)
        .arg("--json")
        .output()
        .expect("run list-distributions");
    assert!(output.status.success());
    let infos: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    let system = infos
        .as_array()
        .and_then(|list| list.iter().find(|info| info["name"] == "system"))
        .expect("system distribution listed");
    assert_eq!(system["has_baseline"], true);
    assert_eq!(system["units"][0], "libc.so");
}

#[test]
fn report_file_and_tallied_frequencies() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let graph = write_graph(root, "app.json", "app", EdgeType::Indirect);
    let report = root.join("reports").join("first.txt");

    cargo_bin_cmd!("cfi-merge")
        .arg("merge")
        .arg("--root")
        .arg(root)
        .arg("--graph")
        .arg(&graph)
        .arg("--report")
        .arg(&report)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&report).expect("read report"), "1000 Untrusted module app\n");

    cargo_bin_cmd!("cfi-merge")
        .arg("tally-frequencies")
        .arg("--root")
        .arg(root)
        .assert()
        .success()
        .stdout(contains("indirect targets: 1"));
    let stats = WorkspaceLayout::new(root).default_stats_path();
    let text = fs::read_to_string(&stats).expect("read stats");
    let value: serde_json::Value = serde_json::from_str(&text).expect("stats json");
    assert_eq!(value["modules"]["app"]["indirect_targets"]["32"], 1);
}

#[test]
fn trace_matches_prints_decisions_per_depth() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let graph = write_graph(root, "app.json", "app", EdgeType::Direct);

    cargo_bin_cmd!("cfi-merge")
        .arg("merge")
        .arg("--root")
        .arg(root)
        .arg("--graph")
        .arg(&graph)
        .arg("--trace-matches")
        .assert()
        .success()
        .stdout(contains("depth 0: 2 decisions"));
}

#[test]
fn show_baseline_for_unknown_distribution_fails() {
    let dir = tempdir().expect("tempdir");
    init_workspace(dir.path());

    cargo_bin_cmd!("cfi-merge")
        .arg("show-baseline")
        .arg("--root")
        .arg(dir.path())
        .arg("--distribution")
        .arg("nobody")
        .assert()
        .failure()
        .stderr(contains("No baseline stored for distribution 'nobody'"));
}

/// Single-module run with two blocks joined by a direct edge.
fn write_trace(dir: &Path) {
    fs::create_dir_all(dir).expect("create trace dir");
    let words = |values: &[u64]| -> Vec<u8> { values.iter().flat_map(|v| v.to_le_bytes()).collect() };
    let base = 0x40_0000u64;
    let files: [(&str, Vec<u8>); 6] = [
        ("app.block-hash.run-77.dat", words(&[0x10, 0x20])),
        ("app.pair-hash.run-77.dat", words(&[0x1020])),
        ("app.module.run-77.log", b"app 400000 401000\n".to_vec()),
        ("app.graph-hash.run-77.dat", words(&[base + 0x10, 0x10, base + 0x20, 0x20])),
        ("app.module-graph.run-77.dat", words(&[base + 0x10, base + 0x20])),
        ("app.cross-module-graph.run-77.dat", Vec::new()),
    ];
    for (name, bytes) in files {
        fs::write(dir.join(name), bytes).expect("write stream");
    }
}

#[test]
fn trace_info_summarizes_streams_and_graphs() {
    let dir = tempdir().expect("tempdir");
    let trace = dir.path().join("run-77");
    write_trace(&trace);

    cargo_bin_cmd!("cfi-merge")
        .arg("trace-info")
        .arg("--trace")
        .arg(&trace)
        .assert()
        .success()
        .stdout(contains("Trace: app-77"))
        .stdout(contains("graph-hash: app.graph-hash.run-77.dat (32 bytes, 2 records)"))
        .stdout(contains("app: 2 nodes, 1 edges"));
}

#[test]
fn trace_directory_merges_like_a_graph_file() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let trace = root.join("run-77");
    write_trace(&trace);

    cargo_bin_cmd!("cfi-merge")
        .arg("merge")
        .arg("--root")
        .arg(root)
        .arg("--trace")
        .arg(&trace)
        .assert()
        .success()
        .stdout(contains("Merged app into <main-program> (new module): 2 new nodes, 1 new edges"));

    let runs = BaselineDb::open(&WorkspaceLayout::new(root).db_path)
        .expect("open db")
        .list_merge_runs(None)
        .expect("runs");
    assert_eq!(runs.len(), 1);
    assert!(runs[0].source.contains("app-77"), "unexpected source: {}", runs[0].source);
}

#[test]
fn trace_info_on_incomplete_directory_fails() {
    let dir = tempdir().expect("tempdir");
    let trace = dir.path().join("run-77");
    write_trace(&trace);
    fs::remove_file(trace.join("app.pair-hash.run-77.dat")).expect("remove stream");

    cargo_bin_cmd!("cfi-merge")
        .arg("trace-info")
        .arg("--trace")
        .arg(&trace)
        .assert()
        .failure()
        .stderr(contains("pair-hash"));
}

#[test]
fn merge_with_tag_strategy_matches_by_position() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path();
    init_workspace(root);
    let graph = write_graph(root, "app.json", "app", EdgeType::Direct);
    merge_graph(root, &graph).success();

    cargo_bin_cmd!("cfi-merge")
        .arg("merge")
        .arg("--root")
        .arg(root)
        .arg("--graph")
        .arg(&graph)
        .arg("--strategy")
        .arg("tag")
        .assert()
        .success()
        .stdout(contains("0 new nodes, 0 new edges, 2 matched"));

    cargo_bin_cmd!("cfi-merge")
        .arg("merge")
        .arg("--root")
        .arg(root)
        .arg("--graph")
        .arg(&graph)
        .arg("--strategy")
        .arg("fuzzy")
        .assert()
        .failure()
        .stderr(contains("unknown merge strategy"));
}
