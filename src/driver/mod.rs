// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence drivers for traces.
//!
//! A [`TraceDriver`] stores nodes, spaces, space entries, logs and trace
//! metadata. The manager depends only on this trait, so storage can be
//! swapped without touching the trace logic.
//!
//! # Drivers
//!
//! - [`MemoryDriver`]: process-local maps, the default
//! - [`LocalDriver`]: JSON files under a base directory
//! - [`SqliteDriver`]: a single SQLite database
//!
//! Absent records are `Ok(None)` (or empty lists), never errors. Every
//! method is async; dropping the future abandons the call.

mod local;
mod memory;
mod sqlite;

pub use local::LocalDriver;
pub use memory::MemoryDriver;
pub use sqlite::SqliteDriver;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{DriverKind, TraceConfig};
use crate::error::{DriverError, DriverResult};
use crate::types::{TraceInfo, TraceLog, TraceNode, TraceSpace, TraceTree};

/// Durable storage for traces.
#[async_trait]
pub trait TraceDriver: Send + Sync {
    /// Short driver name, recorded in [`TraceInfo::driver`].
    fn name(&self) -> &'static str;

    // ---- nodes ----

    async fn save_node(&self, trace_id: &str, node: &TraceNode) -> DriverResult<()>;

    async fn load_node(&self, trace_id: &str, node_id: &str) -> DriverResult<Option<TraceNode>>;

    /// Every stored node of a trace, in no particular order.
    async fn load_nodes(&self, trace_id: &str) -> DriverResult<Vec<TraceNode>>;

    /// The nested tree of a trace, or `None` if it has no root node.
    async fn load_trace(&self, trace_id: &str) -> DriverResult<Option<TraceTree>> {
        let nodes = self.load_nodes(trace_id).await?;
        Ok(TraceTree::assemble(nodes))
    }

    // ---- spaces ----

    async fn save_space(&self, trace_id: &str, space: &TraceSpace) -> DriverResult<()>;

    async fn load_space(&self, trace_id: &str, space_id: &str) -> DriverResult<Option<TraceSpace>>;

    /// Delete a space and all of its entries.
    async fn delete_space(&self, trace_id: &str, space_id: &str) -> DriverResult<()>;

    /// IDs of every stored space, sorted.
    async fn list_spaces(&self, trace_id: &str) -> DriverResult<Vec<String>>;

    // ---- space entries ----

    async fn set_space_key(
        &self,
        trace_id: &str,
        space_id: &str,
        key: &str,
        value: &Value,
    ) -> DriverResult<()>;

    async fn get_space_key(
        &self,
        trace_id: &str,
        space_id: &str,
        key: &str,
    ) -> DriverResult<Option<Value>>;

    async fn has_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<bool>;

    async fn delete_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<()>;

    async fn clear_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<()>;

    /// Keys of a space, sorted.
    async fn list_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<Vec<String>>;

    // ---- logs ----

    async fn save_log(&self, trace_id: &str, log: &TraceLog) -> DriverResult<()>;

    /// Logs of a trace in write order, optionally only those of one node.
    async fn load_logs(&self, trace_id: &str, node_id: Option<&str>) -> DriverResult<Vec<TraceLog>>;

    // ---- trace metadata ----

    async fn save_trace_info(&self, info: &TraceInfo) -> DriverResult<()>;

    async fn load_trace_info(&self, trace_id: &str) -> DriverResult<Option<TraceInfo>>;

    /// Remove everything stored for a trace.
    async fn delete_trace(&self, trace_id: &str) -> DriverResult<()>;

    /// Release resources. Later calls fail with [`DriverError::Closed`].
    async fn close(&self) -> DriverResult<()>;
}

/// Build the driver selected by a configuration.
pub fn open_driver(config: &TraceConfig) -> DriverResult<Arc<dyn TraceDriver>> {
    let driver: Arc<dyn TraceDriver> = match config.driver {
        DriverKind::Memory => Arc::new(MemoryDriver::new()),
        DriverKind::Local => {
            let path = config
                .storage_path()
                .ok_or_else(|| DriverError::Unavailable("no storage path configured".to_string()))?;
            Arc::new(LocalDriver::new(path))
        }
        DriverKind::Sqlite => {
            let path = config
                .storage_path()
                .ok_or_else(|| DriverError::Unavailable("no storage path configured".to_string()))?;
            Arc::new(SqliteDriver::open(&path)?)
        }
    };
    tracing::debug!(driver = driver.name(), "opened trace driver");
    Ok(driver)
}
