// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process trace storage.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DriverError, DriverResult};
use crate::types::{TraceInfo, TraceLog, TraceNode, TraceSpace};

use super::TraceDriver;

#[derive(Debug, Default)]
struct TraceStore {
    nodes: HashMap<String, TraceNode>,
    spaces: HashMap<String, TraceSpace>,
    entries: HashMap<String, BTreeMap<String, Value>>,
    logs: Vec<TraceLog>,
    info: Option<TraceInfo>,
}

/// Driver that keeps every trace in process memory.
///
/// Nothing survives the process. Writes can be made to fail on demand with
/// [`MemoryDriver::fail_writes`] or, for a single operation, with
/// [`MemoryDriver::fail_operation`]. That is how tests exercise persistence
/// errors.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    traces: RwLock<HashMap<String, TraceStore>>,
    fail_writes: AtomicBool,
    failing_ops: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make one write operation (by trait method name, e.g.
    /// `"save_trace_info"`) fail, or succeed again.
    pub fn fail_operation(&self, op: &str, fail: bool) {
        let mut ops = self.failing_ops.lock().unwrap_or_else(|e| e.into_inner());
        if fail {
            ops.insert(op.to_string());
        } else {
            ops.remove(op);
        }
    }

    /// IDs of every trace with stored data, sorted.
    pub fn trace_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.traces.read() {
            Ok(traces) => traces.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort();
        ids
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn read(&self) -> DriverResult<RwLockReadGuard<'_, HashMap<String, TraceStore>>> {
        self.check_open()?;
        self.traces
            .read()
            .map_err(|_| DriverError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(
        &self,
        op: &str,
    ) -> DriverResult<RwLockWriteGuard<'_, HashMap<String, TraceStore>>> {
        self.check_open()?;
        if self.fail_writes.load(Ordering::SeqCst)
            || self
                .failing_ops
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(op)
        {
            return Err(DriverError::Injected(op.to_string()));
        }
        self.traces
            .write()
            .map_err(|_| DriverError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TraceDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save_node(&self, trace_id: &str, node: &TraceNode) -> DriverResult<()> {
        let mut traces = self.write("save_node")?;
        traces
            .entry(trace_id.to_string())
            .or_default()
            .nodes
            .insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn load_node(&self, trace_id: &str, node_id: &str) -> DriverResult<Option<TraceNode>> {
        let traces = self.read()?;
        Ok(traces
            .get(trace_id)
            .and_then(|store| store.nodes.get(node_id).cloned()))
    }

    async fn load_nodes(&self, trace_id: &str) -> DriverResult<Vec<TraceNode>> {
        let traces = self.read()?;
        Ok(traces
            .get(trace_id)
            .map(|store| store.nodes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_space(&self, trace_id: &str, space: &TraceSpace) -> DriverResult<()> {
        let mut traces = self.write("save_space")?;
        traces
            .entry(trace_id.to_string())
            .or_default()
            .spaces
            .insert(space.id.clone(), space.clone());
        Ok(())
    }

    async fn load_space(&self, trace_id: &str, space_id: &str) -> DriverResult<Option<TraceSpace>> {
        let traces = self.read()?;
        Ok(traces
            .get(trace_id)
            .and_then(|store| store.spaces.get(space_id).cloned()))
    }

    async fn delete_space(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
        let mut traces = self.write("delete_space")?;
        if let Some(store) = traces.get_mut(trace_id) {
            store.spaces.remove(space_id);
            store.entries.remove(space_id);
        }
        Ok(())
    }

    async fn list_spaces(&self, trace_id: &str) -> DriverResult<Vec<String>> {
        let traces = self.read()?;
        let mut ids: Vec<String> = traces
            .get(trace_id)
            .map(|store| store.spaces.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn set_space_key(
        &self,
        trace_id: &str,
        space_id: &str,
        key: &str,
        value: &Value,
    ) -> DriverResult<()> {
        let mut traces = self.write("set_space_key")?;
        traces
            .entry(trace_id.to_string())
            .or_default()
            .entries
            .entry(space_id.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get_space_key(
        &self,
        trace_id: &str,
        space_id: &str,
        key: &str,
    ) -> DriverResult<Option<Value>> {
        let traces = self.read()?;
        Ok(traces
            .get(trace_id)
            .and_then(|store| store.entries.get(space_id))
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn has_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<bool> {
        let traces = self.read()?;
        Ok(traces
            .get(trace_id)
            .and_then(|store| store.entries.get(space_id))
            .is_some_and(|entries| entries.contains_key(key)))
    }

    async fn delete_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<()> {
        let mut traces = self.write("delete_space_key")?;
        if let Some(entries) = traces
            .get_mut(trace_id)
            .and_then(|store| store.entries.get_mut(space_id))
        {
            entries.remove(key);
        }
        Ok(())
    }

    async fn clear_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
        let mut traces = self.write("clear_space_keys")?;
        if let Some(store) = traces.get_mut(trace_id) {
            store.entries.remove(space_id);
        }
        Ok(())
    }

    async fn list_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<Vec<String>> {
        let traces = self.read()?;
        // BTreeMap keys are already sorted
        Ok(traces
            .get(trace_id)
            .and_then(|store| store.entries.get(space_id))
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_log(&self, trace_id: &str, log: &TraceLog) -> DriverResult<()> {
        let mut traces = self.write("save_log")?;
        traces
            .entry(trace_id.to_string())
            .or_default()
            .logs
            .push(log.clone());
        Ok(())
    }

    async fn load_logs(&self, trace_id: &str, node_id: Option<&str>) -> DriverResult<Vec<TraceLog>> {
        let traces = self.read()?;
        Ok(traces
            .get(trace_id)
            .map(|store| {
                store
                    .logs
                    .iter()
                    .filter(|log| node_id.map_or(true, |id| log.node_id == id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_trace_info(&self, info: &TraceInfo) -> DriverResult<()> {
        let mut traces = self.write("save_trace_info")?;
        traces.entry(info.id.clone()).or_default().info = Some(info.clone());
        Ok(())
    }

    async fn load_trace_info(&self, trace_id: &str) -> DriverResult<Option<TraceInfo>> {
        let traces = self.read()?;
        Ok(traces.get(trace_id).and_then(|store| store.info.clone()))
    }

    async fn delete_trace(&self, trace_id: &str) -> DriverResult<()> {
        let mut traces = self.write("delete_trace")?;
        traces.remove(trace_id);
        Ok(())
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;
    use serde_json::json;

    #[tokio::test]
    async fn test_fail_writes_blocks_writes_not_reads() {
        let driver = MemoryDriver::new();
        driver.save_node("t", &TraceNode::root("r", 1)).await.unwrap();

        driver.fail_writes(true);
        let err = driver
            .save_node("t", &TraceNode::root("r2", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Injected(_)));
        assert!(driver.load_node("t", "r").await.unwrap().is_some());

        driver.fail_writes(false);
        driver.save_node("t", &TraceNode::root("r2", 1)).await.unwrap();
        assert_eq!(driver.load_nodes("t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_operation_targets_one_write() {
        let driver = MemoryDriver::new();
        driver.fail_operation("save_trace_info", true);

        driver.save_node("t", &TraceNode::root("r", 1)).await.unwrap();
        let info = TraceInfo {
            id: "t".to_string(),
            driver: "memory".to_string(),
            status: crate::types::TraceStatus::Running,
            root_id: Some("r".to_string()),
            created_at: 1,
            updated_at: 1,
            created_by: None,
            team_id: None,
            tenant_id: None,
            metadata: None,
        };
        let err = driver.save_trace_info(&info).await.unwrap_err();
        assert!(matches!(err, DriverError::Injected(ref op) if op == "save_trace_info"));
        assert!(driver.load_trace_info("t").await.unwrap().is_none());

        driver.fail_operation("save_trace_info", false);
        driver.save_trace_info(&info).await.unwrap();
        assert_eq!(driver.load_trace_info("t").await.unwrap(), Some(info));
    }

    #[tokio::test]
    async fn test_logs_filtered_by_node() {
        let driver = MemoryDriver::new();
        for (node, msg) in [("a", "one"), ("b", "two"), ("a", "three")] {
            let log = TraceLog {
                timestamp: 1,
                level: LogLevel::Info,
                message: msg.to_string(),
                node_id: node.to_string(),
            };
            driver.save_log("t", &log).await.unwrap();
        }

        let all = driver.load_logs("t", None).await.unwrap();
        assert_eq!(all.len(), 3);
        let a: Vec<String> = driver
            .load_logs("t", Some("a"))
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.message)
            .collect();
        assert_eq!(a, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn test_trace_ids() {
        let driver = MemoryDriver::new();
        driver.set_space_key("b", "s", "k", &json!(1)).await.unwrap();
        driver.save_node("a", &TraceNode::root("r", 1)).await.unwrap();
        assert_eq!(driver.trace_ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_closed_rejects_calls() {
        let driver = MemoryDriver::new();
        driver.close().await.unwrap();
        assert!(matches!(
            driver.load_node("t", "r").await,
            Err(DriverError::Closed)
        ));
    }
}
