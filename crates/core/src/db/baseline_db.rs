use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::db::{BaselineSummary, MergeRunRecord, MergeRunStatus};
use crate::graph::{EdgeType, GraphError, MergedClusterGraph, MetaNodeType, NodeId, NodeSpec};
use crate::merge::DistributionBaselines;

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    #[error("Invalid {column} value '{value}' stored for distribution {distribution}")]
    InvalidValue { distribution: String, column: &'static str, value: String },

    #[error("Stored baseline {distribution} is not a valid graph: {source}")]
    CorruptGraph {
        distribution: String,
        #[source]
        source: GraphError,
    },

    #[error("Stored baseline {distribution} does not match its digest")]
    DigestMismatch { distribution: String },
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite store for distribution baselines and merge history.
///
/// Nodes are stored in id order so reloading reassigns every instance id
/// exactly as it was.
#[derive(Debug)]
pub struct BaselineDb {
    conn: Connection,
}

impl BaselineDb {
    /// Open (or create) a baseline database and bring its schema up to date.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Replace the stored copy of a baseline in one transaction.
    pub fn save_baseline(&self, baseline: &MergedClusterGraph) -> DbResult<()> {
        let name = baseline.distribution.as_str();
        let graph = &baseline.graph;
        let tx = self.conn.unchecked_transaction()?;

        for table in ["baseline_modules", "baseline_nodes", "baseline_edges", "baselines"] {
            tx.execute(&format!("DELETE FROM {table} WHERE distribution = ?1"), params![name])?;
        }

        tx.execute(
            r#"
            INSERT INTO baselines (distribution, node_count, edge_count, digest, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                name,
                graph.node_count() as i64,
                graph.edge_count() as i64,
                baseline.digest(),
                chrono::Utc::now().to_rfc3339()
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO baseline_modules (distribution, module) VALUES (?1, ?2)",
            )?;
            for module in &baseline.modules {
                stmt.execute(params![name, module])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO baseline_nodes (distribution, idx, hash, module, tag, version, kind)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for (id, node) in graph.nodes() {
                stmt.execute(params![
                    name,
                    id.0 as i64,
                    node.hash() as i64,
                    node.module(),
                    node.tag() as i64,
                    i64::from(node.version()),
                    node.kind().as_str()
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO baseline_edges (distribution, idx, from_idx, to_idx, kind, ordinal)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for (id, edge) in graph.edges() {
                stmt.execute(params![
                    name,
                    id.0 as i64,
                    edge.from.0 as i64,
                    edge.to.0 as i64,
                    edge.kind.as_str(),
                    i64::from(edge.ordinal)
                ])?;
            }
        }

        tx.commit()?;
        log::debug!(
            "Saved baseline {name}: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(())
    }

    /// Load one baseline, or `None` if it was never saved.
    pub fn load_baseline(&self, distribution: &str) -> DbResult<Option<MergedClusterGraph>> {
        let stored_digest: Option<String> = self
            .conn
            .query_row(
                "SELECT digest FROM baselines WHERE distribution = ?1",
                params![distribution],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored_digest) = stored_digest else {
            return Ok(None);
        };

        let mut baseline = MergedClusterGraph::new(distribution);

        {
            let mut stmt = self.conn.prepare(
                "SELECT module FROM baseline_modules WHERE distribution = ?1 ORDER BY module",
            )?;
            let rows = stmt.query_map(params![distribution], |row| row.get::<_, String>(0))?;
            for module in rows {
                baseline.modules.insert(module?);
            }
        }

        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT hash, module, tag, version, kind FROM baseline_nodes
                WHERE distribution = ?1
                ORDER BY idx
                "#,
            )?;
            let rows = stmt.query_map(params![distribution], |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u64,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            for row in rows {
                let (hash, module, tag, version, kind) = row?;
                let kind = MetaNodeType::parse(&kind)
                    .ok_or_else(|| invalid(distribution, "node kind", kind.clone()))?;
                let version = u8::try_from(version)
                    .map_err(|_| invalid(distribution, "node version", version.to_string()))?;
                baseline
                    .graph
                    .add_node(NodeSpec::new(hash, module, kind).with_tag(tag).with_version(version));
            }
        }

        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT from_idx, to_idx, kind, ordinal FROM baseline_edges
                WHERE distribution = ?1
                ORDER BY idx
                "#,
            )?;
            let rows = stmt.query_map(params![distribution], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            for row in rows {
                let (from, to, kind, ordinal) = row?;
                let kind = EdgeType::parse(&kind)
                    .ok_or_else(|| invalid(distribution, "edge kind", kind.clone()))?;
                let ordinal = u32::try_from(ordinal)
                    .map_err(|_| invalid(distribution, "edge ordinal", ordinal.to_string()))?;
                let from = node_index(distribution, from)?;
                let to = node_index(distribution, to)?;
                baseline.graph.add_edge(from, to, kind, ordinal).map_err(|source| {
                    DbError::CorruptGraph { distribution: distribution.to_string(), source }
                })?;
            }
        }

        if baseline.digest() != stored_digest {
            return Err(DbError::DigestMismatch { distribution: distribution.to_string() });
        }
        Ok(Some(baseline))
    }

    /// Every stored baseline.
    pub fn load_all(&self) -> DbResult<DistributionBaselines> {
        let mut baselines = DistributionBaselines::new();
        for name in self.baseline_names()? {
            if let Some(baseline) = self.load_baseline(&name)? {
                baselines.insert(baseline);
            }
        }
        Ok(baselines)
    }

    pub fn baseline_names(&self) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT distribution FROM baselines ORDER BY distribution")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Summaries of stored baselines, without loading their graphs.
    pub fn list_baselines(&self) -> DbResult<Vec<BaselineSummary>> {
        let mut summaries = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT distribution, node_count, edge_count, digest, updated_at
                FROM baselines
                ORDER BY distribution
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(BaselineSummary {
                    distribution: row.get(0)?,
                    modules: Vec::new(),
                    node_count: row.get::<_, i64>(1)? as usize,
                    edge_count: row.get::<_, i64>(2)? as usize,
                    digest: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?;
            for row in rows {
                summaries.push(row?);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT module FROM baseline_modules WHERE distribution = ?1 ORDER BY module",
        )?;
        for summary in &mut summaries {
            let rows =
                stmt.query_map(params![summary.distribution], |row| row.get::<_, String>(0))?;
            for module in rows {
                summary.modules.push(module?);
            }
        }
        Ok(summaries)
    }

    /// Record one merge attempt and return its row id.
    pub fn record_merge_run(&self, record: &MergeRunRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO merge_runs (distribution, module, source, status, new_nodes, new_edges, matched_nodes, message, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.distribution,
                record.module,
                record.source,
                record.status.as_str(),
                record.new_nodes as i64,
                record.new_edges as i64,
                record.matched_nodes as i64,
                record.message,
                record.started_at,
                record.finished_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Merge history, oldest first, optionally for one distribution.
    pub fn list_merge_runs(&self, distribution: Option<&str>) -> DbResult<Vec<MergeRunRecord>> {
        type RawRun = (MergeRunRecord, String);

        fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
            let status: String = row.get(3)?;
            Ok((
                MergeRunRecord {
                    distribution: row.get(0)?,
                    module: row.get(1)?,
                    source: row.get(2)?,
                    status: MergeRunStatus::Merged,
                    new_nodes: row.get::<_, i64>(4)? as usize,
                    new_edges: row.get::<_, i64>(5)? as usize,
                    matched_nodes: row.get::<_, i64>(6)? as usize,
                    message: row.get(7)?,
                    started_at: row.get(8)?,
                    finished_at: row.get(9)?,
                },
                status,
            ))
        }

        let sql = r#"
            SELECT distribution, module, source, status, new_nodes, new_edges, matched_nodes, message, started_at, finished_at
            FROM merge_runs
            WHERE ?1 IS NULL OR distribution = ?1
            ORDER BY id
        "#;
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![distribution], map_run)?;

        let mut out = Vec::new();
        for row in rows {
            let (mut record, status) = row?;
            record.status = MergeRunStatus::parse(&status)
                .ok_or_else(|| invalid(&record.distribution, "merge run status", status.clone()))?;
            out.push(record);
        }
        Ok(out)
    }
}

fn invalid(distribution: &str, column: &'static str, value: String) -> DbError {
    DbError::InvalidValue { distribution: distribution.to_string(), column, value }
}

fn node_index(distribution: &str, value: i64) -> DbResult<NodeId> {
    usize::try_from(value)
        .map(NodeId)
        .map_err(|_| invalid(distribution, "edge endpoint", value.to_string()))
}

/// Apply schema migrations to bring the database to the latest version.
///
/// `PRAGMA user_version` holds the schema version.
///
/// Version map:
/// - 0: no schema
/// - 1: baselines, baseline_modules, baseline_nodes, baseline_edges
/// - 2: merge_runs
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS baselines (
                distribution TEXT PRIMARY KEY,
                node_count   INTEGER NOT NULL,
                edge_count   INTEGER NOT NULL,
                digest       TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS baseline_modules (
                distribution TEXT NOT NULL,
                module       TEXT NOT NULL,
                PRIMARY KEY(distribution, module)
            );

            CREATE TABLE IF NOT EXISTS baseline_nodes (
                distribution TEXT NOT NULL,
                idx          INTEGER NOT NULL,
                hash         INTEGER NOT NULL,
                module       TEXT NOT NULL,
                tag          INTEGER NOT NULL,
                version      INTEGER NOT NULL,
                kind         TEXT NOT NULL,
                PRIMARY KEY(distribution, idx)
            );

            CREATE TABLE IF NOT EXISTS baseline_edges (
                distribution TEXT NOT NULL,
                idx          INTEGER NOT NULL,
                from_idx     INTEGER NOT NULL,
                to_idx       INTEGER NOT NULL,
                kind         TEXT NOT NULL,
                ordinal      INTEGER NOT NULL,
                PRIMARY KEY(distribution, idx)
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS merge_runs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                distribution  TEXT NOT NULL,
                module        TEXT NOT NULL,
                source        TEXT NOT NULL,
                status        TEXT NOT NULL,
                new_nodes     INTEGER NOT NULL,
                new_edges     INTEGER NOT NULL,
                matched_nodes INTEGER NOT NULL,
                message       TEXT,
                started_at    TEXT NOT NULL,
                finished_at   TEXT NOT NULL
            );
            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

