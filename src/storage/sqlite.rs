//! SQLite implementation of the state store

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use super::{FileUpdate, StateStore, StoreError, StoreResult};
use crate::models::{FileRecord, NewFileRecord, NodeCounts, NodeState, OperationRecord};

const FILE_COLUMNS: &str = "id, uuid, filename, size_bytes, node, path, created_at, history";

/// SQLite-backed state store
///
/// Uses `Mutex` to serialize access to the single connection.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite state store initialized");
        Ok(store)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    filename TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    node TEXT NOT NULL,
                    path TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    history TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_files_node ON files(node);
                CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at);

                CREATE TABLE IF NOT EXISTS node_states (
                    node TEXT PRIMARY KEY,
                    drained INTEGER NOT NULL DEFAULT 0,
                    reason TEXT,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS operations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    action TEXT NOT NULL,
                    nodes TEXT NOT NULL,
                    before_metrics TEXT,
                    after_metrics TEXT,
                    status TEXT NOT NULL,
                    details TEXT
                );
                "#,
        )?;
        Ok(())
    }

    fn fetch_file(conn: &Connection, id: i64) -> StoreResult<Option<FileRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![id],
                file_from_row,
            )
            .optional()?;
        Ok(record)
    }
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    // Fixed-width UTC form keeps lexical order equal to time order.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional_json<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        uuid: row.get(1)?,
        filename: row.get(2)?,
        size_bytes: row.get::<_, i64>(3)?.max(0) as u64,
        node: row.get(4)?,
        path: row.get(5)?,
        created_at: parse_timestamp(row, 6)?,
        history: parse_json(row, 7)?,
    })
}

fn node_state_from_row(row: &Row<'_>) -> rusqlite::Result<NodeState> {
    Ok(NodeState {
        node: row.get(0)?,
        drained: row.get(1)?,
        reason: row.get(2)?,
        updated_at: Some(parse_timestamp(row, 3)?),
    })
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<OperationRecord> {
    Ok(OperationRecord {
        id: Some(row.get(0)?),
        timestamp: parse_timestamp(row, 1)?,
        actor: row.get(2)?,
        action: row.get(3)?,
        nodes: parse_json(row, 4)?,
        before_metrics: parse_optional_json::<NodeCounts>(row, 5)?,
        after_metrics: parse_optional_json::<NodeCounts>(row, 6)?,
        status: row
            .get::<_, String>(7)?
            .parse()
            .unwrap_or(crate::models::OperationStatus::Failed),
        details: row.get(8)?,
    })
}

impl StateStore for SqliteStateStore {
    fn get_files(&self) -> StoreResult<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files ORDER BY created_at DESC, id DESC"
        ))?;
        let files = stmt
            .query_map([], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    fn get_file(&self, id: i64) -> StoreResult<Option<FileRecord>> {
        let conn = self.lock()?;
        Self::fetch_file(&conn, id)
    }

    fn create_file_record(&self, record: NewFileRecord) -> StoreResult<FileRecord> {
        let conn = self.lock()?;
        let created_at = Utc::now();
        let history = serde_json::to_string(&record.history)?;

        conn.execute(
            r#"
                INSERT INTO files (uuid, filename, size_bytes, node, path, created_at, history)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            params![
                record.uuid,
                record.filename,
                record.size_bytes as i64,
                record.node,
                record.path,
                timestamp(&created_at),
                history
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(FileRecord {
            id,
            uuid: record.uuid,
            filename: record.filename,
            size_bytes: record.size_bytes,
            node: record.node,
            path: record.path,
            created_at,
            history: record.history,
        })
    }

    fn update_file_record(&self, id: i64, update: &FileUpdate) -> StoreResult<FileRecord> {
        let conn = self.lock()?;
        let history = serde_json::to_string(&update.history)?;

        // Single conditional UPDATE: node, path and history change together.
        let changed = conn.execute(
            "UPDATE files SET node = ?1, path = ?2, history = ?3 WHERE id = ?4 AND node = ?5",
            params![update.node, update.path, history, id, update.expected_node],
        )?;

        if changed == 0 {
            return match Self::fetch_file(&conn, id)? {
                Some(_) => Err(StoreError::NodeMismatch {
                    id,
                    expected: update.expected_node.clone(),
                }),
                None => Err(StoreError::FileNotFound(id)),
            };
        }

        Self::fetch_file(&conn, id)?.ok_or(StoreError::FileNotFound(id))
    }

    fn delete_file_record(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn get_node_states(&self) -> StoreResult<Vec<NodeState>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT node, drained, reason, updated_at FROM node_states ORDER BY node")?;
        let states = stmt
            .query_map([], node_state_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    fn set_node_state(
        &self,
        node: &str,
        drained: bool,
        reason: Option<&str>,
    ) -> StoreResult<NodeState> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            r#"
                INSERT INTO node_states (node, drained, reason, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(node) DO UPDATE SET
                    drained = excluded.drained,
                    reason = excluded.reason,
                    updated_at = excluded.updated_at
                "#,
            params![node, drained, reason, timestamp(&now)],
        )?;

        Ok(NodeState {
            node: node.to_string(),
            drained,
            reason: reason.map(String::from),
            updated_at: Some(now),
        })
    }

    fn record_operation(&self, entry: &OperationRecord) -> StoreResult<i64> {
        let conn = self.lock()?;
        let nodes = serde_json::to_string(&entry.nodes)?;
        let before = entry
            .before_metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let after = entry
            .after_metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            r#"
                INSERT INTO operations (timestamp, actor, action, nodes, before_metrics, after_metrics, status, details)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            params![
                timestamp(&entry.timestamp),
                entry.actor,
                entry.action,
                nodes,
                before,
                after,
                entry.status.as_str(),
                entry.details
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn list_operations(&self, limit: usize) -> StoreResult<Vec<OperationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, actor, action, nodes, before_metrics, after_metrics, status, details
             FROM operations ORDER BY id DESC LIMIT ?1",
        )?;
        let ops = stmt
            .query_map(params![limit as i64], operation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ops)
    }
}
