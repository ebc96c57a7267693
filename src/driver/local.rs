// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON file trace storage.
//!
//! Layout under the base directory:
//!
//! ```text
//! {base}/{first 8 chars of trace id | "others"}/{trace id}/
//!     trace_info.json
//!     nodes/{node id}.json
//!     spaces/{space id}.json
//!     spaces/{space id}/data.json
//!     logs/{node id}.jsonl
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::types::{TraceInfo, TraceLog, TraceNode, TraceSpace};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::TraceDriver;

const TRACE_INFO_FILE: &str = "trace_info.json";
const SPACE_DATA_FILE: &str = "data.json";

/// Driver that stores each trace as a directory of JSON files.
#[derive(Debug)]
pub struct LocalDriver {
    base: PathBuf,
    /// Serializes read-modify-write of space data files.
    data_lock: Mutex<()>,
    /// Serializes appends to log files.
    log_lock: Mutex<()>,
    closed: AtomicBool,
}

impl LocalDriver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            data_lock: Mutex::new(()),
            log_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Directory holding one trace.
    pub fn trace_path(&self, trace_id: &str) -> DriverResult<PathBuf> {
        check_component(trace_id)?;
        let prefix = trace_id.get(..8).unwrap_or("others");
        Ok(self.base.join(prefix).join(trace_id))
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn node_path(&self, trace_id: &str, node_id: &str) -> DriverResult<PathBuf> {
        check_component(node_id)?;
        Ok(self
            .trace_path(trace_id)?
            .join("nodes")
            .join(format!("{}.json", node_id)))
    }

    fn space_path(&self, trace_id: &str, space_id: &str) -> DriverResult<PathBuf> {
        check_component(space_id)?;
        Ok(self
            .trace_path(trace_id)?
            .join("spaces")
            .join(format!("{}.json", space_id)))
    }

    fn space_data_dir(&self, trace_id: &str, space_id: &str) -> DriverResult<PathBuf> {
        check_component(space_id)?;
        Ok(self.trace_path(trace_id)?.join("spaces").join(space_id))
    }

    fn log_path(&self, trace_id: &str, node_id: &str) -> DriverResult<PathBuf> {
        check_component(node_id)?;
        Ok(self
            .trace_path(trace_id)?
            .join("logs")
            .join(format!("{}.jsonl", node_id)))
    }

    async fn load_space_data(
        &self,
        trace_id: &str,
        space_id: &str,
    ) -> DriverResult<BTreeMap<String, Value>> {
        let path = self.space_data_dir(trace_id, space_id)?.join(SPACE_DATA_FILE);
        Ok(read_json(&path).await?.unwrap_or_default())
    }

    async fn save_space_data(
        &self,
        trace_id: &str,
        space_id: &str,
        data: &BTreeMap<String, Value>,
    ) -> DriverResult<()> {
        let path = self.space_data_dir(trace_id, space_id)?.join(SPACE_DATA_FILE);
        write_json(&path, data).await
    }

    /// Read-modify-write one space's data file under the data lock.
    async fn update_space_data<F>(&self, trace_id: &str, space_id: &str, f: F) -> DriverResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, Value>) + Send,
    {
        self.check_open()?;
        let _guard = self.data_lock.lock().await;
        let mut data = self.load_space_data(trace_id, space_id).await?;
        f(&mut data);
        self.save_space_data(trace_id, space_id, &data).await
    }
}

/// Reject IDs that would escape their directory.
fn check_component(id: &str) -> DriverResult<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(DriverError::Io(format!("invalid path component: {:?}", id)));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> DriverResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write through a temp file and rename, so readers never see a torn file.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> DriverResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_file_if_exists(path: &Path) -> DriverResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn remove_dir_if_exists(path: &Path) -> DriverResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// File names in `dir` ending with `suffix`, sorted. A missing directory is empty.
async fn list_files(dir: &Path, suffix: &str) -> DriverResult<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(suffix) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Parse a JSON-lines log file, skipping malformed lines.
async fn read_log_file(path: &Path) -> DriverResult<Vec<TraceLog>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(log) => Some(log),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping malformed log line");
                None
            }
        })
        .collect())
}

#[async_trait]
impl TraceDriver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn save_node(&self, trace_id: &str, node: &TraceNode) -> DriverResult<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.check_open()?;
        write_json(&self.node_path(trace_id, &node.id)?, node).await?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.driver.local.save_node", start.elapsed());

        Ok(())
    }

    async fn load_node(&self, trace_id: &str, node_id: &str) -> DriverResult<Option<TraceNode>> {
        self.check_open()?;
        read_json(&self.node_path(trace_id, node_id)?).await
    }

    async fn load_nodes(&self, trace_id: &str) -> DriverResult<Vec<TraceNode>> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.check_open()?;
        let dir = self.trace_path(trace_id)?.join("nodes");
        let mut nodes = Vec::new();
        for name in list_files(&dir, ".json").await? {
            if let Some(node) = read_json::<TraceNode>(&dir.join(&name)).await? {
                nodes.push(node);
            }
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.driver.local.load_nodes", start.elapsed());

        Ok(nodes)
    }

    async fn save_space(&self, trace_id: &str, space: &TraceSpace) -> DriverResult<()> {
        self.check_open()?;
        write_json(&self.space_path(trace_id, &space.id)?, space).await
    }

    async fn load_space(&self, trace_id: &str, space_id: &str) -> DriverResult<Option<TraceSpace>> {
        self.check_open()?;
        read_json(&self.space_path(trace_id, space_id)?).await
    }

    async fn delete_space(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
        self.check_open()?;
        let _guard = self.data_lock.lock().await;
        remove_file_if_exists(&self.space_path(trace_id, space_id)?).await?;
        remove_dir_if_exists(&self.space_data_dir(trace_id, space_id)?).await
    }

    async fn list_spaces(&self, trace_id: &str) -> DriverResult<Vec<String>> {
        self.check_open()?;
        let dir = self.trace_path(trace_id)?.join("spaces");
        Ok(list_files(&dir, ".json")
            .await?
            .into_iter()
            .filter_map(|name| name.strip_suffix(".json").map(String::from))
            .collect())
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

        let key = key.to_string();
        let value = value.clone();
        self.update_space_data(trace_id, space_id, move |data| {
            data.insert(key, value);
        })
        .await?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.driver.local.set_space_key", start.elapsed());

        Ok(())
    }

    async fn get_space_key(
        &self,
        trace_id: &str,
        space_id: &str,
        key: &str,
    ) -> DriverResult<Option<Value>> {
        self.check_open()?;
        let mut data = self.load_space_data(trace_id, space_id).await?;
        Ok(data.remove(key))
    }

    async fn has_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<bool> {
        self.check_open()?;
        Ok(self
            .load_space_data(trace_id, space_id)
            .await?
            .contains_key(key))
    }

    async fn delete_space_key(&self, trace_id: &str, space_id: &str, key: &str) -> DriverResult<()> {
        let key = key.to_string();
        self.update_space_data(trace_id, space_id, move |data| {
            data.remove(&key);
        })
        .await
    }

    async fn clear_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<()> {
        self.update_space_data(trace_id, space_id, |data| data.clear())
            .await
    }

    async fn list_space_keys(&self, trace_id: &str, space_id: &str) -> DriverResult<Vec<String>> {
        self.check_open()?;
        Ok(self
            .load_space_data(trace_id, space_id)
            .await?
            .into_keys()
            .collect())
    }

    async fn save_log(&self, trace_id: &str, log: &TraceLog) -> DriverResult<()> {
        self.check_open()?;
        let path = self.log_path(trace_id, &log.node_id)?;
        let mut line = serde_json::to_vec(log)?;
        line.push(b'\n');

        let _guard = self.log_lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_logs(&self, trace_id: &str, node_id: Option<&str>) -> DriverResult<Vec<TraceLog>> {
        self.check_open()?;
        if let Some(node_id) = node_id {
            return read_log_file(&self.log_path(trace_id, node_id)?).await;
        }

        let dir = self.trace_path(trace_id)?.join("logs");
        let mut logs = Vec::new();
        for name in list_files(&dir, ".jsonl").await? {
            logs.extend(read_log_file(&dir.join(&name)).await?);
        }
        // Stable, so per-node write order survives within one second
        logs.sort_by_key(|log| log.timestamp);
        Ok(logs)
    }

    async fn save_trace_info(&self, info: &TraceInfo) -> DriverResult<()> {
        self.check_open()?;
        let path = self.trace_path(&info.id)?.join(TRACE_INFO_FILE);
        write_json(&path, info).await
    }

    async fn load_trace_info(&self, trace_id: &str) -> DriverResult<Option<TraceInfo>> {
        self.check_open()?;
        read_json(&self.trace_path(trace_id)?.join(TRACE_INFO_FILE)).await
    }

    async fn delete_trace(&self, trace_id: &str) -> DriverResult<()> {
        self.check_open()?;
        let _guard = self.data_lock.lock().await;
        remove_dir_if_exists(&self.trace_path(trace_id)?).await
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
    use tempfile::TempDir;

    #[test]
    fn test_trace_path_prefix() {
        let driver = LocalDriver::new("/base");
        assert_eq!(
            driver.trace_path("20260101123456789012").unwrap(),
            PathBuf::from("/base/20260101/20260101123456789012")
        );
        assert_eq!(
            driver.trace_path("short").unwrap(),
            PathBuf::from("/base/others/short")
        );
    }

    #[test]
    fn test_rejects_path_traversal() {
        let driver = LocalDriver::new("/base");
        assert!(driver.trace_path("..").is_err());
        assert!(driver.trace_path("a/b").is_err());
        assert!(driver.node_path("trace-id", "../x").is_err());
    }

    #[tokio::test]
    async fn test_files_on_disk() {
        let temp = TempDir::new().unwrap();
        let driver = LocalDriver::new(temp.path());
        let trace = "20260101000000000001";

        driver.save_node(trace, &TraceNode::root("r", 1)).await.unwrap();
        driver
            .set_space_key(trace, "s1", "k", &json!({"a": 1}))
            .await
            .unwrap();

        let dir = driver.trace_path(trace).unwrap();
        assert!(dir.join("nodes").join("r.json").exists());
        assert!(dir.join("spaces").join("s1").join("data.json").exists());
    }

    #[tokio::test]
    async fn test_malformed_log_lines_are_skipped() {
        let temp = TempDir::new().unwrap();
        let driver = LocalDriver::new(temp.path());
        let trace = "t-logs";

        let log = TraceLog {
            timestamp: 5,
            level: LogLevel::Warn,
            message: "careful".to_string(),
            node_id: "n1".to_string(),
        };
        driver.save_log(trace, &log).await.unwrap();

        let path = driver.log_path(trace, "n1").unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();
        driver.save_log(trace, &log).await.unwrap();

        let logs = driver.load_logs(trace, Some("n1")).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0], log);
    }

    #[tokio::test]
    async fn test_concurrent_space_writes_are_not_lost() {
        let temp = TempDir::new().unwrap();
        let driver = std::sync::Arc::new(LocalDriver::new(temp.path()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let driver = driver.clone();
            handles.push(tokio::spawn(async move {
                driver
                    .set_space_key("t-conc", "s", &format!("k{:02}", i), &json!(i))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let keys = driver.list_space_keys("t-conc", "s").await.unwrap();
        assert_eq!(keys.len(), 16);
        assert_eq!(keys[0], "k00");
    }
}
