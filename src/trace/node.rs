// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Handles to individual nodes.

use std::fmt;

use serde_json::Value;

use crate::error::Result;
use crate::types::{LogLevel, TraceNode};

use super::manager::{Target, TraceManager};

/// A node returned by [`TraceManager::add`] or [`TraceManager::parallel`].
///
/// Operations on a handle affect only its node, whatever the cursor points
/// at, so concurrent branches can each log and finish on their own. Events
/// and persistence are the same as for the cursor operations.
#[derive(Clone)]
pub struct NodeHandle {
    manager: TraceManager,
    id: String,
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("trace_id", &self.manager.trace_id())
            .field("id", &self.id)
            .finish()
    }
}

impl NodeHandle {
    pub(crate) fn new(manager: TraceManager, id: String) -> Self {
        Self { manager, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn manager(&self) -> &TraceManager {
        &self.manager
    }

    /// Current in-memory state of the node.
    pub fn snapshot(&self) -> Option<TraceNode> {
        self.manager.state().nodes.get(&self.id).cloned()
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into()).await;
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into()).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into()).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into()).await;
    }

    async fn log(&self, level: LogLevel, message: String) {
        self.manager
            .log_to(Target::Node(&self.id), level, message)
            .await;
    }

    pub async fn set_output(&self, output: Value) -> Result<()> {
        self.manager
            .set_output_on(Target::Node(&self.id), output)
            .await
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.manager
            .set_metadata_on(Target::Node(&self.id), key.into(), value)
            .await
    }

    pub async fn complete(&self, output: Option<Value>) -> Result<()> {
        self.manager
            .complete_on(Target::Node(&self.id), output)
            .await
    }

    pub async fn fail(&self, error: impl fmt::Display) -> Result<()> {
        self.manager
            .fail_on(Target::Node(&self.id), error.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, TraceDriver};
    use crate::types::{NodeStatus, ParallelInput};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_branches_finish_independently() {
        let driver = Arc::new(MemoryDriver::new());
        let manager = TraceManager::detached("t", driver.clone()).await.unwrap();
        let branches = manager
            .parallel(vec![ParallelInput::labeled("B"), ParallelInput::labeled("C")])
            .await
            .unwrap();

        branches[0].info("searching").await;
        branches[0].complete(Some(json!("found"))).await.unwrap();
        branches[1].fail("timeout").await.unwrap();

        let b = branches[0].snapshot().unwrap();
        let c = branches[1].snapshot().unwrap();
        assert_eq!(b.status, NodeStatus::Completed);
        assert_eq!(b.output, Some(json!("found")));
        assert_eq!(c.status, NodeStatus::Failed);

        let b_logs = driver.load_logs("t", Some(branches[0].id())).await.unwrap();
        assert_eq!(b_logs.len(), 1);
        assert_eq!(manager.current_nodes().len(), 2);
    }

    #[tokio::test]
    async fn test_handle_outlives_cursor_move() {
        let driver = Arc::new(MemoryDriver::new());
        let manager = TraceManager::detached("t", driver).await.unwrap();
        let a = manager.add(None, Default::default()).await.unwrap();
        let b = manager.add(None, Default::default()).await.unwrap();

        a.set_metadata("tokens", json!(12)).await.unwrap();
        assert_eq!(a.snapshot().unwrap().metadata_value("tokens"), Some(&json!(12)));
        assert!(b.snapshot().unwrap().metadata.is_none());
    }
}
