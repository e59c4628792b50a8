use rusqlite::Connection;
use tempfile::tempdir;

use cfi_merge_core::db::{
    save_workspace_config, BaselineDb, DbError, MergeRunRecord, MergeRunStatus, WorkspaceConfig,
    WorkspaceContext, WorkspaceLayout, CURRENT_SCHEMA_VERSION,
};
use cfi_merge_core::dist::MAIN_PROGRAM;
use cfi_merge_core::graph::{EdgeType, ExecutionGraph, MergedClusterGraph, MetaNodeType, NodeKey, NodeSpec};
use cfi_merge_core::merge::{GraphMerger, MergeConfig};

fn sample_baseline() -> MergedClusterGraph {
    let mut execution = ExecutionGraph::new("app");
    let g = &mut execution.graph;
    let a = g.add_node(NodeSpec::new(0xdead_beef_0000_0001, "app", MetaNodeType::Normal).with_tag(0x10));
    let b = g.add_node(NodeSpec::new(0x77, "app", MetaNodeType::Return).with_tag(0x20).with_version(3));
    let c = g.add_node(NodeSpec::new(0x77, "app", MetaNodeType::Normal).with_tag(0x30));
    let exit = g.add_node(NodeSpec::new(0x99, "app", MetaNodeType::ModuleExit));
    g.add_edge(a, b, EdgeType::Direct, 0).expect("edge");
    g.add_edge(b, c, EdgeType::UnexpectedReturn, 2).expect("edge");
    g.add_edge(c, exit, EdgeType::Indirect, 0).expect("edge");

    let mut baseline = MergedClusterGraph::new(MAIN_PROGRAM);
    GraphMerger::new(MergeConfig::default()).merge(&mut baseline, &execution).expect("merge");
    baseline
}

fn run(distribution: &str, status: MergeRunStatus, started_at: &str) -> MergeRunRecord {
    MergeRunRecord {
        distribution: distribution.into(),
        module: "app".into(),
        source: "/runs/app-1".into(),
        status,
        new_nodes: 2,
        new_edges: 1,
        matched_nodes: 5,
        message: (status == MergeRunStatus::Rejected).then(|| "edge conflict".to_string()),
        started_at: started_at.into(),
        finished_at: started_at.into(),
    }
}

#[test]
fn baseline_round_trip_preserves_keys_and_digest() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("baselines.db");
    let baseline = sample_baseline();

    {
        let db = BaselineDb::open(&db_path).expect("open db");
        db.save_baseline(&baseline).expect("save baseline");
    }

    let db = BaselineDb::open(&db_path).expect("reopen db");
    let loaded = db.load_baseline(MAIN_PROGRAM).expect("load").expect("baseline present");
    assert_eq!(loaded.digest(), baseline.digest());
    assert_eq!(loaded.graph.node_count(), 4);
    assert_eq!(loaded.graph.edge_count(), 3);
    assert!(loaded.contains_module("app"));
    assert!(loaded.graph.lookup_by_key(NodeKey { hash: 0x77, instance: 1 }).is_some());
    assert!(loaded.graph.lookup_by_key(NodeKey { hash: 0xdead_beef_0000_0001, instance: 0 }).is_some());
}

#[test]
fn saving_again_replaces_previous_copy() {
    let db = BaselineDb::open_in_memory().expect("open db");
    let mut baseline = sample_baseline();
    db.save_baseline(&baseline).expect("first save");

    baseline.modules.insert("libextra.so".into());
    baseline.graph.add_node(NodeSpec::new(0x5, "libextra.so", MetaNodeType::Normal));
    db.save_baseline(&baseline).expect("second save");

    let summaries = db.list_baselines().expect("list baselines");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].node_count, 5);
    assert_eq!(summaries[0].modules, vec!["app".to_string(), "libextra.so".to_string()]);
    assert_eq!(summaries[0].digest, baseline.digest());

    let all = db.load_all().expect("load all");
    assert_eq!(all.names(), vec![MAIN_PROGRAM.to_string()]);
}

#[test]
fn unknown_distribution_loads_as_none() {
    let db = BaselineDb::open_in_memory().expect("open db");
    assert!(db.load_baseline("nobody").expect("load").is_none());
    assert!(db.baseline_names().expect("names").is_empty());
}

#[test]
fn tampered_rows_fail_digest_check() {
    let db = BaselineDb::open_in_memory().expect("open db");
    db.save_baseline(&sample_baseline()).expect("save");
    db.connection()
        .execute("UPDATE baseline_nodes SET tag = 4096 WHERE idx = 0", [])
        .expect("tamper");

    let err = db.load_baseline(MAIN_PROGRAM).unwrap_err();
    assert!(matches!(err, DbError::DigestMismatch { .. }), "unexpected error: {err}");
}

#[test]
fn invalid_stored_kind_is_reported() {
    let db = BaselineDb::open_in_memory().expect("open db");
    db.save_baseline(&sample_baseline()).expect("save");
    db.connection()
        .execute("UPDATE baseline_edges SET kind = 'teleport' WHERE idx = 1", [])
        .expect("tamper");

    let err = db.load_baseline(MAIN_PROGRAM).unwrap_err();
    assert!(err.to_string().contains("teleport"), "unexpected error: {err}");
}

#[test]
fn merge_runs_insert_and_filter() {
    let db = BaselineDb::open_in_memory().expect("open db");
    db.record_merge_run(&run(MAIN_PROGRAM, MergeRunStatus::Merged, "t0")).expect("insert");
    db.record_merge_run(&run("system", MergeRunStatus::Rejected, "t1")).expect("insert");
    db.record_merge_run(&run(MAIN_PROGRAM, MergeRunStatus::Merged, "t2")).expect("insert");

    let all = db.list_merge_runs(None).expect("list runs");
    assert_eq!(all.len(), 3);
    assert_eq!(all[1].status, MergeRunStatus::Rejected);
    assert_eq!(all[1].message.as_deref(), Some("edge conflict"));

    let main = db.list_merge_runs(Some(MAIN_PROGRAM)).expect("filter runs");
    let started: Vec<&str> = main.iter().map(|r| r.started_at.as_str()).collect();
    assert_eq!(started, vec!["t0", "t2"]);
}

#[test]
fn schema_version_is_current_after_open() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("baselines.db");
    BaselineDb::open(&db_path).expect("open db");

    let conn = Connection::open(&db_path).expect("open raw");
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).expect("version");
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("baselines.db");
    {
        let conn = Connection::open(&db_path).expect("open raw");
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1).expect("set version");
    }

    let err = BaselineDb::open(&db_path).unwrap_err();
    assert!(
        matches!(err, DbError::UnsupportedSchemaVersion { found, .. } if found == CURRENT_SCHEMA_VERSION + 1),
        "unexpected error: {err}"
    );
}

#[test]
fn workspace_context_loads_config_and_distributions() {
    let dir = tempdir().expect("tempdir");
    let layout = WorkspaceLayout::new(dir.path());
    for path in layout.directories() {
        std::fs::create_dir_all(path).expect("create dir");
    }
    std::fs::write(layout.distributions_dir.join("system.asd"), "libc.so\n").expect("write asd");

    let mut config = WorkspaceConfig::new("ws", layout.db_path_relative_string());
    config.merge.max_context_depth = 5;
    save_workspace_config(&layout, &config).expect("save config");

    let ctx = WorkspaceContext::from_root(dir.path()).expect("workspace context");
    assert_eq!(ctx.config.name, "ws");
    assert_eq!(ctx.db_path, layout.db_path);
    assert_eq!(ctx.analysis.merge.max_context_depth, 5);
    assert_eq!(ctx.analysis.registry.distribution_for("libc.so"), "system");
}
