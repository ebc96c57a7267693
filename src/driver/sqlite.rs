// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-based trace storage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{DriverError, DriverResult};
use crate::types::{LogLevel, TraceInfo, TraceLog, TraceNode, TraceSpace};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::TraceDriver;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Driver that stores every trace in one SQLite database.
///
/// Statements are short, so they run on the calling task while holding the
/// connection lock.
pub struct SqliteDriver {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    closed: AtomicBool,
}

impl SqliteDriver {
    /// Open or create a database file.
    pub fn open(db_path: &Path) -> DriverResult<Self> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;

        // WAL lets readers proceed while a write is in flight
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let driver = Self::from_connection(conn, Some(db_path.to_path_buf()))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.driver.sqlite.open", start.elapsed());

        Ok(driver)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> DriverResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> DriverResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            closed: AtomicBool::new(false),
        })
    }

    /// Database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn conn(&self) -> DriverResult<MutexGuard<'_, Connection>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(self.conn.lock().await)
    }
}

fn init_schema(conn: &Connection) -> DriverResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS trace_nodes (
            trace_id TEXT NOT NULL,
            id TEXT NOT NULL,
            parent_id TEXT,
            status TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (trace_id, id)
        );

        CREATE TABLE IF NOT EXISTS trace_spaces (
            trace_id TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (trace_id, id)
        );

        CREATE TABLE IF NOT EXISTS space_entries (
            trace_id TEXT NOT NULL,
            space_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (trace_id, space_id, key)
        );

        CREATE TABLE IF NOT EXISTS trace_logs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trace_info (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_logs_trace_node ON trace_logs(trace_id, node_id);
        "#,
    )?;

    let current_version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    if current_version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            params![SCHEMA_VERSION],
        )?;
    }

    Ok(())
}

fn parse_level(level: &str) -> LogLevel {
    match level {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

#[async_trait]
impl TraceDriver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn save_node(&self, trace_id: &str, node: &TraceNode) -> DriverResult<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let data = serde_json::to_string(node)?;
        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO trace_nodes (trace_id, id, parent_id, status, data, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (trace_id, id) DO UPDATE SET
                parent_id = excluded.parent_id,
                status = excluded.status,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![
                trace_id,
                node.id,
                node.parent_id,
                node.status.as_str(),
                data,
                node.updated_at,
            ],
        )?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.driver.sqlite.save_node", start.elapsed());

        Ok(())
    }

    async fn load_node(&self, trace_id: &str, node_id: &str) -> DriverResult<Option<TraceNode>> {
        let conn = self.conn().await?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM trace_nodes WHERE trace_id = ? AND id = ?",
                params![trace_id, node_id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(DriverError::from))
            .transpose()
    }

    async fn load_nodes(&self, trace_id: &str) -> DriverResult<Vec<TraceNode>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare("SELECT data FROM trace_nodes WHERE trace_id = ?")?;
        let rows = stmt.query_map(params![trace_id], |row| row.get::<_, String>(0))?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(serde_json::from_str(&row?)?);
        }
        Ok(nodes)
    }

    async fn save_space(&self, trace_id: &str, space: &TraceSpace) -> DriverResult<()> {
        let data = serde_json::to_string(space)?;
        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO trace_spaces (trace_id, id, data, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT (trace_id, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![trace_id, space.id, data, space.updated_at],
        )?;
        Ok(())
    }

    async fn load_space(&self, trace_id: &str, space_id: &str) -> DriverResult<Option<TraceSpace>> {
        let conn = self.conn().await?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM trace_spaces WHERE trace_id = ? AND id = ?",
                params![trace_id, space_id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(DriverError::from))
            .transpose()
    }

    async fn delete_space(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM space_entries WHERE trace_id = ? AND space_id = ?",
            params![trace_id, space_id],
        )?;
        tx.execute(
            "DELETE FROM trace_spaces WHERE trace_id = ? AND id = ?",
            params![trace_id, space_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn list_spaces(&self, trace_id: &str) -> DriverResult<Vec<String>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare("SELECT id FROM trace_spaces WHERE trace_id = ? ORDER BY id")?;
        let ids = stmt
            .query_map(params![trace_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    async fn set_space_key(
        &self,
        trace_id: &str,
        space_id: &str,
        key: &str,
        value: &Value,
    ) -> DriverResult<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let value = serde_json::to_string(value)?;
        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO space_entries (trace_id, space_id, key, value) VALUES (?, ?, ?, ?)
            ON CONFLICT (trace_id, space_id, key) DO UPDATE SET value = excluded.value
            "#,
            params![trace_id, space_id, key, value],
        )?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.driver.sqlite.set_space_key", start.elapsed());

        Ok(())
    }

    async fn get_space_key(
        &self,
        trace_id: &str,
        space_id: &str,
        key: &str,
    ) -> DriverResult<Option<Value>> {
        let conn = self.conn().await?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM space_entries WHERE trace_id = ? AND space_id = ? AND key = ?",
                params![trace_id, space_id, key],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| serde_json::from_str(&v).map_err(DriverError::from))
            .transpose()
    }

    async fn has_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<bool> {
        let conn = self.conn().await?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM space_entries WHERE trace_id = ? AND space_id = ? AND key = ?",
            params![trace_id, space_id, key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn delete_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM space_entries WHERE trace_id = ? AND space_id = ? AND key = ?",
            params![trace_id, space_id, key],
        )?;
        Ok(())
    }

    async fn clear_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM space_entries WHERE trace_id = ? AND space_id = ?",
            params![trace_id, space_id],
        )?;
        Ok(())
    }

    async fn list_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<Vec<String>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare(
            "SELECT key FROM space_entries WHERE trace_id = ? AND space_id = ? ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![trace_id, space_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    async fn save_log(&self, trace_id: &str, log: &TraceLog) -> DriverResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO trace_logs (trace_id, node_id, level, message, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                trace_id,
                log.node_id,
                log.level.as_str(),
                log.message,
                log.timestamp,
            ],
        )?;
        Ok(())
    }

    async fn load_logs(&self, trace_id: &str, node_id: Option<&str>) -> DriverResult<Vec<TraceLog>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare(
            r#"
            SELECT node_id, level, message, timestamp FROM trace_logs
            WHERE trace_id = ?1 AND (?2 IS NULL OR node_id = ?2)
            ORDER BY seq
            "#,
        )?;
        let logs = stmt
            .query_map(params![trace_id, node_id], |row| {
                let level: String = row.get(1)?;
                Ok(TraceLog {
                    node_id: row.get(0)?,
                    level: parse_level(&level),
                    message: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    async fn save_trace_info(&self, info: &TraceInfo) -> DriverResult<()> {
        let data = serde_json::to_string(info)?;
        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO trace_info (id, status, data, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![info.id, info.status.as_str(), data, info.updated_at],
        )?;
        Ok(())
    }

    async fn load_trace_info(&self, trace_id: &str) -> DriverResult<Option<TraceInfo>> {
        let conn = self.conn().await?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM trace_info WHERE id = ?",
                params![trace_id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(DriverError::from))
            .transpose()
    }

    async fn delete_trace(&self, trace_id: &str) -> DriverResult<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut conn = self.conn().await?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM trace_nodes WHERE trace_id = ?", params![trace_id])?;
        tx.execute("DELETE FROM trace_spaces WHERE trace_id = ?", params![trace_id])?;
        tx.execute("DELETE FROM space_entries WHERE trace_id = ?", params![trace_id])?;
        tx.execute("DELETE FROM trace_logs WHERE trace_id = ?", params![trace_id])?;
        tx.execute("DELETE FROM trace_info WHERE id = ?", params![trace_id])?;
        tx.commit()?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.driver.sqlite.delete_trace", start.elapsed());

        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        // Hold the lock so no statement is mid-flight when the flag flips
        let _conn = self.conn.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
