#![forbid(unsafe_code)]

mod audit;
mod error;
mod evidence;
mod graph;
mod moves;
mod requests;
mod runs;
mod tool_runs;
mod trace;
mod types;
mod versioned;

pub use error::StoreError;
pub use requests::*;
pub use types::*;

use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tl_core::ids::canonical_identifier;
use tl_core::model::ActorType;

const SCHEMA_VERSION: i64 = 1;
const DB_FILE: &str = "traceledger.db";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        preflight_gate(&conn)?;
        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = [
        "workspace_state",
        "workspaces",
        "counters",
        "runs",
        "move_events",
        "move_evidence_links",
        "move_tool_links",
        "tool_runs",
        "evidence_refs",
        "versioned_records",
        "kg_nodes",
        "kg_edges",
        "audit_events",
    ]
    .into_iter()
    .collect();

    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }

    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM workspace_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    let now_ms = now_ms();

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workspace_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspaces (
          workspace TEXT PRIMARY KEY,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counters (
          workspace TEXT NOT NULL,
          name TEXT NOT NULL,
          value INTEGER NOT NULL,
          PRIMARY KEY (workspace, name)
        );

        CREATE TABLE IF NOT EXISTS runs (
          workspace TEXT NOT NULL,
          id TEXT NOT NULL,
          profile TEXT NOT NULL,
          anchor_json TEXT,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (workspace, id),
          FOREIGN KEY(workspace) REFERENCES workspaces(workspace) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS move_events (
          workspace TEXT NOT NULL,
          run_id TEXT NOT NULL,
          seq INTEGER NOT NULL,
          move_type TEXT NOT NULL,
          status TEXT NOT NULL,
          inputs_json TEXT,
          outputs_json TEXT,
          assumptions_json TEXT,
          uncertainties_json TEXT,
          backtrack_of_seq INTEGER,
          backtrack_reason TEXT,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (workspace, run_id, seq),
          FOREIGN KEY(workspace, run_id) REFERENCES runs(workspace, id) ON DELETE CASCADE,
          CHECK(backtrack_of_seq IS NULL OR backtrack_of_seq < seq)
        );

        CREATE TABLE IF NOT EXISTS move_evidence_links (
          workspace TEXT NOT NULL,
          run_id TEXT NOT NULL,
          seq INTEGER NOT NULL,
          evidence_id TEXT NOT NULL,
          role TEXT NOT NULL,
          note TEXT,
          PRIMARY KEY (workspace, run_id, seq, evidence_id, role),
          FOREIGN KEY(workspace, run_id, seq)
            REFERENCES move_events(workspace, run_id, seq)
            ON DELETE CASCADE,
          FOREIGN KEY(workspace, evidence_id)
            REFERENCES evidence_refs(workspace, id)
            ON DELETE RESTRICT
        );

        CREATE TABLE IF NOT EXISTS move_tool_links (
          workspace TEXT NOT NULL,
          run_id TEXT NOT NULL,
          seq INTEGER NOT NULL,
          tool_run_id TEXT NOT NULL,
          PRIMARY KEY (workspace, run_id, seq, tool_run_id),
          FOREIGN KEY(workspace, run_id, seq)
            REFERENCES move_events(workspace, run_id, seq)
            ON DELETE CASCADE,
          FOREIGN KEY(workspace, tool_run_id)
            REFERENCES tool_runs(workspace, id)
            ON DELETE RESTRICT
        );

        CREATE TABLE IF NOT EXISTS tool_runs (
          workspace TEXT NOT NULL,
          id TEXT NOT NULL,
          tool_name TEXT NOT NULL,
          status TEXT NOT NULL,
          inputs_json TEXT NOT NULL,
          outputs_json TEXT,
          confidence_hint REAL,
          uncertainty_note TEXT,
          started_at_ms INTEGER NOT NULL,
          ended_at_ms INTEGER,
          PRIMARY KEY (workspace, id),
          FOREIGN KEY(workspace) REFERENCES workspaces(workspace) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS evidence_refs (
          workspace TEXT NOT NULL,
          id TEXT NOT NULL,
          source_type TEXT NOT NULL,
          source_id TEXT NOT NULL,
          fragment_id TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (workspace, id),
          UNIQUE (workspace, source_type, source_id, fragment_id),
          FOREIGN KEY(workspace) REFERENCES workspaces(workspace) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS versioned_records (
          workspace TEXT NOT NULL,
          kind TEXT NOT NULL,
          id TEXT NOT NULL,
          scope_key TEXT NOT NULL,
          record_json TEXT NOT NULL,
          is_current INTEGER NOT NULL,
          superseded_by TEXT,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (workspace, kind, id),
          FOREIGN KEY(workspace) REFERENCES workspaces(workspace) ON DELETE CASCADE,
          CHECK(superseded_by IS NULL OR superseded_by <> id),
          CHECK(is_current = 0 OR superseded_by IS NULL)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_versioned_one_current
          ON versioned_records(workspace, kind, scope_key)
          WHERE is_current = 1;

        CREATE INDEX IF NOT EXISTS idx_versioned_scope_created
          ON versioned_records(workspace, kind, scope_key, created_at_ms, id);

        CREATE TABLE IF NOT EXISTS kg_nodes (
          workspace TEXT NOT NULL,
          id TEXT NOT NULL,
          node_type TEXT NOT NULL,
          props_json TEXT,
          canonical_fk TEXT,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (workspace, id),
          FOREIGN KEY(workspace) REFERENCES workspaces(workspace) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS kg_edges (
          workspace TEXT NOT NULL,
          id TEXT NOT NULL,
          src_id TEXT NOT NULL,
          dst_id TEXT NOT NULL,
          edge_type TEXT NOT NULL,
          props_json TEXT,
          evidence_id TEXT,
          tool_run_id TEXT,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (workspace, id),
          FOREIGN KEY(workspace, src_id) REFERENCES kg_nodes(workspace, id) ON DELETE RESTRICT,
          FOREIGN KEY(workspace, dst_id) REFERENCES kg_nodes(workspace, id) ON DELETE RESTRICT,
          FOREIGN KEY(workspace, evidence_id) REFERENCES evidence_refs(workspace, id) ON DELETE RESTRICT,
          FOREIGN KEY(workspace, tool_run_id) REFERENCES tool_runs(workspace, id) ON DELETE RESTRICT,
          CHECK(evidence_id IS NOT NULL OR tool_run_id IS NOT NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_kg_edges_src ON kg_edges(workspace, src_id, edge_type);
        CREATE INDEX IF NOT EXISTS idx_kg_edges_dst ON kg_edges(workspace, dst_id, edge_type);

        CREATE TABLE IF NOT EXISTS audit_events (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          workspace TEXT NOT NULL,
          ts_ms INTEGER NOT NULL,
          event_type TEXT NOT NULL,
          actor_type TEXT NOT NULL,
          actor_id TEXT NOT NULL,
          run_id TEXT,
          scope_key TEXT,
          tool_run_id TEXT,
          payload_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_workspace_seq ON audit_events(workspace, seq);
        CREATE INDEX IF NOT EXISTS idx_audit_workspace_run ON audit_events(workspace, run_id, seq);
        "#,
    )?;

    conn.execute(
        "INSERT INTO workspace_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version, updated_at_ms=excluded.updated_at_ms",
        params![SCHEMA_VERSION, now_ms],
    )?;

    Ok(())
}

fn ensure_workspace_tx(
    tx: &Transaction<'_>,
    workspace_id: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR IGNORE INTO workspaces(workspace, created_at_ms) VALUES (?1, ?2)",
        params![workspace_id, now_ms],
    )?;
    Ok(())
}

fn next_counter_tx(tx: &Transaction<'_>, workspace: &str, name: &str) -> Result<i64, StoreError> {
    let current: i64 = tx
        .query_row(
            "SELECT value FROM counters WHERE workspace=?1 AND name=?2",
            params![workspace, name],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    let next = current + 1;
    tx.execute(
        r#"
        INSERT INTO counters(workspace, name, value) VALUES (?1, ?2, ?3)
        ON CONFLICT(workspace, name) DO UPDATE SET value=excluded.value
        "#,
        params![workspace, name, next],
    )?;
    Ok(next)
}

fn run_exists_tx(tx: &Transaction<'_>, workspace: &str, run_id: &str) -> Result<bool, StoreError> {
    Ok(tx
        .query_row(
            "SELECT 1 FROM runs WHERE workspace=?1 AND id=?2",
            params![workspace, run_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn ensure_run_exists_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    run_id: &str,
) -> Result<(), StoreError> {
    if run_exists_tx(tx, workspace, run_id)? {
        Ok(())
    } else {
        Err(StoreError::UnknownRun)
    }
}

fn evidence_exists_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    evidence_id: &str,
) -> Result<bool, StoreError> {
    Ok(tx
        .query_row(
            "SELECT 1 FROM evidence_refs WHERE workspace=?1 AND id=?2",
            params![workspace, evidence_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn tool_run_exists_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    tool_run_id: &str,
) -> Result<bool, StoreError> {
    Ok(tx
        .query_row(
            "SELECT 1 FROM tool_runs WHERE workspace=?1 AND id=?2",
            params![workspace, tool_run_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

#[allow(clippy::too_many_arguments)]
fn insert_audit_tx(
    tx: &Transaction<'_>,
    workspace: &str,
    ts_ms: i64,
    event_type: &str,
    actor_type: ActorType,
    actor_id: &str,
    run_id: Option<&str>,
    scope_key: Option<&str>,
    tool_run_id: Option<&str>,
    payload_json: &str,
) -> Result<AuditRow, StoreError> {
    tx.execute(
        r#"
        INSERT INTO audit_events(workspace, ts_ms, event_type, actor_type, actor_id, run_id, scope_key, tool_run_id, payload_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            workspace,
            ts_ms,
            event_type,
            actor_type.as_str(),
            actor_id,
            run_id,
            scope_key,
            tool_run_id,
            payload_json
        ],
    )?;
    Ok(AuditRow {
        seq: tx.last_insert_rowid(),
        ts_ms,
        event_type: event_type.to_string(),
        actor_type,
        actor_id: actor_id.to_string(),
        run_id: run_id.map(str::to_string),
        scope_key: scope_key.map(str::to_string),
        tool_run_id: tool_run_id.map(str::to_string),
        payload_json: payload_json.to_string(),
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}

fn canonical_workspace(value: &str) -> Result<String, StoreError> {
    canonical_identifier("workspace_id", value.to_string())
        .map_err(|_| StoreError::InvalidInput("invalid workspace_id"))
}

fn canonical_id(field: &'static str, value: &str) -> Result<String, StoreError> {
    canonical_identifier(field, value.to_string()).map_err(|_| match field {
        "run_id" => StoreError::InvalidInput("invalid run_id"),
        "tool_run_id" => StoreError::InvalidInput("invalid tool_run_id"),
        "node_id" => StoreError::InvalidInput("invalid node_id"),
        "evidence_id" => StoreError::InvalidInput("invalid evidence_id"),
        "scope_key" => StoreError::InvalidInput("invalid scope_key"),
        _ => StoreError::InvalidInput("invalid identifier"),
    })
}

/// Optional JSON payload fields must hold valid JSON; malformed payloads are
/// rejected at the boundary instead of stored opaquely.
fn ensure_json(field: &'static str, value: &str) -> Result<(), StoreError> {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(_) => Ok(()),
        Err(_) => Err(match field {
            "inputs_json" => StoreError::InvalidInput("inputs_json must be valid JSON"),
            "outputs_json" => StoreError::InvalidInput("outputs_json must be valid JSON"),
            "assumptions_json" => StoreError::InvalidInput("assumptions_json must be valid JSON"),
            "uncertainties_json" => {
                StoreError::InvalidInput("uncertainties_json must be valid JSON")
            }
            "anchor_json" => StoreError::InvalidInput("anchor_json must be valid JSON"),
            "record_json" => StoreError::InvalidInput("record_json must be valid JSON"),
            "props_json" => StoreError::InvalidInput("props_json must be valid JSON"),
            "payload_json" => StoreError::InvalidInput("payload_json must be valid JSON"),
            _ => StoreError::InvalidInput("payload must be valid JSON"),
        }),
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
