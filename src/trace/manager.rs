// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The trace manager: node tree, cursor and fork/join.
//!
//! A manager records one trace. It owns the node table and the cursor (the
//! node or nodes that cursor-level operations act on) and publishes every
//! change to its [`UpdateHub`].
//!
//! Mutations are serialized by an async op gate held across driver I/O.
//! Each one snapshots the affected nodes, persists the new versions, and
//! only then commits them to memory and publishes events, so a failed write
//! leaves the tree and cursor as they were. The state lock itself is never
//! held across an `.await`, so readers never wait on storage.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::driver::TraceDriver;
use crate::error::{Result, TraceError};
use crate::types::{
    now_secs, LogLevel, NodeStatus, ParallelInput, TraceInfo, TraceLog, TraceNode,
    TraceNodeOption, TraceSpace, TraceStatus, TraceTree,
};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::hub::{HubConfig, Subscription, UpdateHub};
use super::id::{IdGenerator, NanoIdGenerator};
use super::node::NodeHandle;
use super::update::{
    CompleteStatus, NodeCompleteData, NodeFailedData, NodeStartData, TraceCompleteData,
    TraceInitData, TraceUpdate, UpdateData,
};

/// Optional collaborators for a manager.
#[derive(Clone)]
pub struct ManagerOptions {
    pub ids: Arc<dyn IdGenerator>,
    pub hub: HubConfig,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            ids: Arc::new(NanoIdGenerator::new()),
            hub: HubConfig::default(),
        }
    }
}

/// Which nodes an operation applies to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target<'a> {
    /// Every node under the cursor.
    Cursor,
    /// One node, regardless of the cursor.
    Node(&'a str),
}

#[derive(Debug, Default)]
pub(crate) struct TraceState {
    pub(crate) nodes: HashMap<String, TraceNode>,
    pub(crate) cursor: Vec<String>,
    pub(crate) spaces: HashMap<String, TraceSpace>,
}

pub(crate) struct ManagerInner {
    pub(crate) trace_id: String,
    pub(crate) root_id: String,
    pub(crate) created_at: i64,
    pub(crate) driver: Arc<dyn TraceDriver>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) hub: UpdateHub,
    pub(crate) state: Mutex<TraceState>,
    pub(crate) op_gate: tokio::sync::Mutex<()>,
    cancel: watch::Receiver<bool>,
    completed: AtomicBool,
}

/// Records one trace. Cheap to clone; clones share the same trace.
#[derive(Clone)]
pub struct TraceManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl fmt::Debug for TraceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceManager")
            .field("trace_id", &self.inner.trace_id)
            .field("root_id", &self.inner.root_id)
            .field("driver", &self.inner.driver.name())
            .finish()
    }
}

/// Builder for [`TraceManager`].
pub struct TraceManagerBuilder {
    trace_id: String,
    driver: Arc<dyn TraceDriver>,
    cancel: Option<watch::Receiver<bool>>,
    options: ManagerOptions,
}

impl TraceManagerBuilder {
    /// Cancellation signal; `true` means cancelled.
    pub fn cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.options.ids = ids;
        self
    }

    pub fn hub_config(mut self, hub: HubConfig) -> Self {
        self.options.hub = hub;
        self
    }

    pub async fn build(self) -> Result<TraceManager> {
        let cancel = self.cancel.unwrap_or_else(never_cancelled);
        TraceManager::with_options(self.trace_id, self.driver, cancel, self.options).await
    }
}

/// A signal that never fires. Dropping the sender keeps the last value.
fn never_cancelled() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

impl TraceManager {
    /// Start a trace: create and persist the root node, then publish `init`
    /// and the root's `node_start`.
    pub async fn new(
        trace_id: impl Into<String>,
        driver: Arc<dyn TraceDriver>,
        cancel: watch::Receiver<bool>,
    ) -> Result<Self> {
        Self::with_options(trace_id, driver, cancel, ManagerOptions::default()).await
    }

    /// Start a trace that can never be cancelled.
    pub async fn detached(trace_id: impl Into<String>, driver: Arc<dyn TraceDriver>) -> Result<Self> {
        Self::new(trace_id, driver, never_cancelled()).await
    }

    pub fn builder(trace_id: impl Into<String>, driver: Arc<dyn TraceDriver>) -> TraceManagerBuilder {
        TraceManagerBuilder {
            trace_id: trace_id.into(),
            driver,
            cancel: None,
            options: ManagerOptions::default(),
        }
    }

    #[instrument(skip_all, fields(trace_id))]
    pub async fn with_options(
        trace_id: impl Into<String>,
        driver: Arc<dyn TraceDriver>,
        cancel: watch::Receiver<bool>,
        options: ManagerOptions,
    ) -> Result<Self> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let trace_id = trace_id.into();
        tracing::Span::current().record("trace_id", trace_id.as_str());

        if trace_id.is_empty() {
            return Err(TraceError::Validation("trace id must not be empty".to_string()));
        }
        if *cancel.borrow() {
            return Err(TraceError::Cancelled);
        }

        // A stored tree already has a root; a second one would orphan it
        let existing = driver
            .load_nodes(&trace_id)
            .await
            .map_err(|e| TraceError::persistence("failed to check existing trace", e))?;
        if !existing.is_empty() {
            return Err(TraceError::Validation(format!(
                "trace already exists: {}",
                trace_id
            )));
        }

        let now = now_secs();
        let root = TraceNode::root(options.ids.node_id(), now);
        driver
            .save_node(&trace_id, &root)
            .await
            .map_err(|e| TraceError::persistence("failed to save root node", e))?;

        let mut state = TraceState::default();
        state.cursor.push(root.id.clone());
        state.nodes.insert(root.id.clone(), root.clone());

        let manager = Self {
            inner: Arc::new(ManagerInner {
                trace_id: trace_id.clone(),
                root_id: root.id.clone(),
                created_at: root.created_at,
                driver,
                ids: options.ids,
                hub: UpdateHub::new(options.hub),
                state: Mutex::new(state),
                op_gate: tokio::sync::Mutex::new(()),
                cancel,
                completed: AtomicBool::new(false),
            }),
        };

        manager.publish(TraceUpdate::new(
            trace_id.as_str(),
            now,
            UpdateData::Init(TraceInitData {
                trace_id: trace_id.clone(),
                root_node: root.clone(),
            }),
        ));
        manager.publish(
            TraceUpdate::new(
                trace_id.as_str(),
                now,
                UpdateData::NodeStart(NodeStartData::single(root.clone())),
            )
            .for_node(root.id.as_str()),
        );

        debug!(root_id = %root.id, "trace started");

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.manager.new", start.elapsed());

        Ok(manager)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    pub(crate) fn state(&self) -> MutexGuard<'_, TraceState> {
        // Commits are single inserts, so a poisoned lock still holds a
        // consistent tree.
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if *self.inner.cancel.borrow() {
            return Err(TraceError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn publish(&self, update: TraceUpdate) {
        self.inner.hub.publish(update);
    }

    pub(crate) fn update(&self, now: i64, data: UpdateData) -> TraceUpdate {
        TraceUpdate::new(self.inner.trace_id.as_str(), now, data)
    }

    /// IDs an operation applies to, read under the state lock.
    fn resolve(&self, target: Target<'_>) -> Result<Vec<String>> {
        let state = self.state();
        match target {
            Target::Cursor => Ok(state.cursor.clone()),
            Target::Node(id) if state.nodes.contains_key(id) => Ok(vec![id.to_string()]),
            Target::Node(id) => Err(TraceError::node_not_found(id)),
        }
    }

    fn snapshot_node(&self, id: &str) -> Result<TraceNode> {
        self.state()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| TraceError::node_not_found(id))
    }

    fn commit_nodes<'a>(&self, nodes: impl IntoIterator<Item = &'a TraceNode>) {
        let mut state = self.state();
        for node in nodes {
            state.nodes.insert(node.id.clone(), node.clone());
        }
    }

    /// Persist then commit a change to each target node, publishing one
    /// event per node. Stops at the first failed write.
    async fn apply_to_nodes<M, E>(
        &self,
        ids: &[String],
        context: &str,
        mutate: M,
        event: E,
    ) -> Result<()>
    where
        M: Fn(&mut TraceNode) + Send + Sync,
        E: Fn(&TraceNode) -> UpdateData + Send + Sync,
    {
        for id in ids {
            let mut node = self.snapshot_node(id)?;
            mutate(&mut node);
            self.inner
                .driver
                .save_node(&self.inner.trace_id, &node)
                .await
                .map_err(|e| TraceError::persistence(format!("{} {}", context, id), e))?;

            self.commit_nodes([&node]);
            let update = self.update(node.updated_at, event(&node)).for_node(id.as_str());
            self.publish(update);
        }
        Ok(())
    }

    // ========================================================================
    // Cursor operations
    // ========================================================================

    /// Add the next sequential step.
    ///
    /// While forked, the branches are first joined: a completed Join node is
    /// attached to the branches' common parent and the new node becomes its
    /// only child. Only the new node is announced with `node_start`.
    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id))]
    pub async fn add(&self, input: Option<Value>, option: TraceNodeOption) -> Result<NodeHandle> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;
        self.check_cancelled()?;

        let now = now_secs();
        let (mut parent, mut join) = {
            let state = self.state();
            if state.cursor.len() > 1 {
                let common = state
                    .cursor
                    .first()
                    .and_then(|id| state.nodes.get(id))
                    .and_then(|n| n.parent_id.clone())
                    .ok_or_else(|| {
                        TraceError::Validation("parallel branches have no common parent".to_string())
                    })?;
                let parent = state
                    .nodes
                    .get(&common)
                    .cloned()
                    .ok_or_else(|| TraceError::node_not_found(common.as_str()))?;
                let join = TraceNode::join(self.inner.ids.node_id(), Some(common), now);
                (parent, Some(join))
            } else {
                let id = state
                    .cursor
                    .first()
                    .ok_or_else(|| TraceError::Validation("cursor is empty".to_string()))?;
                let parent = state
                    .nodes
                    .get(id)
                    .cloned()
                    .ok_or_else(|| TraceError::node_not_found(id.as_str()))?;
                (parent, None)
            }
        };

        let new_id = self.inner.ids.node_id();
        let direct_parent = match join.as_mut() {
            Some(join) => {
                join.children.push(new_id.clone());
                parent.children.push(join.id.clone());
                join.id.clone()
            }
            None => {
                parent.children.push(new_id.clone());
                parent.id.clone()
            }
        };
        let node = TraceNode::new(new_id.as_str(), Some(direct_parent), option, input, now);

        let trace_id = self.inner.trace_id.as_str();
        let driver = &self.inner.driver;
        driver
            .save_node(trace_id, &node)
            .await
            .map_err(|e| TraceError::persistence("failed to save node", e))?;
        if let Some(join) = &join {
            driver
                .save_node(trace_id, join)
                .await
                .map_err(|e| TraceError::persistence("failed to save join node", e))?;
        }
        driver
            .save_node(trace_id, &parent)
            .await
            .map_err(|e| TraceError::persistence("failed to save parent node", e))?;

        {
            let mut state = self.state();
            state.nodes.insert(parent.id.clone(), parent);
            if let Some(join) = join.take() {
                debug!(join_id = %join.id, "joined parallel branches");
                state.nodes.insert(join.id.clone(), join);
            }
            state.nodes.insert(node.id.clone(), node.clone());
            state.cursor = vec![node.id.clone()];
        }

        self.publish(
            self.update(now, UpdateData::NodeStart(NodeStartData::single(node.clone())))
                .for_node(node.id.as_str()),
        );
        debug!(node_id = %node.id, label = %node.option.label, "node added");

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.manager.add", start.elapsed());

        Ok(NodeHandle::new(self.clone(), node.id))
    }

    /// Fork the current node into concurrent branches.
    ///
    /// Fails with a validation error for an empty input list, or when the
    /// trace is already forked (call [`TraceManager::add`] to join first).
    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id, branches = inputs.len()))]
    pub async fn parallel(&self, inputs: Vec<ParallelInput>) -> Result<Vec<NodeHandle>> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.check_cancelled()?;
        if inputs.is_empty() {
            return Err(TraceError::Validation(
                "parallel requires at least one input".to_string(),
            ));
        }

        let _gate = self.inner.op_gate.lock().await;
        self.check_cancelled()?;

        let mut parent = {
            let state = self.state();
            if state.cursor.len() > 1 {
                return Err(TraceError::Validation(
                    "trace is already forked; add a node to join the branches first".to_string(),
                ));
            }
            let id = state
                .cursor
                .first()
                .ok_or_else(|| TraceError::Validation("cursor is empty".to_string()))?;
            state
                .nodes
                .get(id)
                .cloned()
                .ok_or_else(|| TraceError::node_not_found(id.as_str()))?
        };

        let now = now_secs();
        let nodes: Vec<TraceNode> = inputs
            .into_iter()
            .map(|branch| {
                TraceNode::new(
                    self.inner.ids.node_id(),
                    Some(parent.id.clone()),
                    branch.option,
                    branch.input,
                    now,
                )
            })
            .collect();
        parent.children.extend(nodes.iter().map(|n| n.id.clone()));

        let trace_id = self.inner.trace_id.as_str();
        for node in &nodes {
            self.inner
                .driver
                .save_node(trace_id, node)
                .await
                .map_err(|e| TraceError::persistence("failed to save parallel node", e))?;
        }
        self.inner
            .driver
            .save_node(trace_id, &parent)
            .await
            .map_err(|e| TraceError::persistence("failed to save parent node", e))?;

        {
            let mut state = self.state();
            state.nodes.insert(parent.id.clone(), parent);
            for node in &nodes {
                state.nodes.insert(node.id.clone(), node.clone());
            }
            state.cursor = nodes.iter().map(|n| n.id.clone()).collect();
        }

        let handles = nodes
            .iter()
            .map(|n| NodeHandle::new(self.clone(), n.id.clone()))
            .collect();
        self.publish(self.update(now, UpdateData::NodeStart(NodeStartData::batch(nodes))));

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.manager.parallel", start.elapsed());

        Ok(handles)
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log_to(Target::Cursor, LogLevel::Info, message.into()).await;
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.log_to(Target::Cursor, LogLevel::Debug, message.into()).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log_to(Target::Cursor, LogLevel::Warn, message.into()).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log_to(Target::Cursor, LogLevel::Error, message.into()).await;
    }

    /// Set the output of every cursor node.
    pub async fn set_output(&self, output: Value) -> Result<()> {
        self.set_output_on(Target::Cursor, output).await
    }

    /// Set a metadata key on every cursor node.
    pub async fn set_metadata(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.set_metadata_on(Target::Cursor, key.into(), value).await
    }

    /// Complete every cursor node, optionally setting its output first.
    /// The cursor itself does not move.
    pub async fn complete(&self, output: Option<Value>) -> Result<()> {
        self.complete_on(Target::Cursor, output).await
    }

    /// Fail every cursor node. An error log line is written first.
    pub async fn fail(&self, error: impl fmt::Display) -> Result<()> {
        self.fail_on(Target::Cursor, error.to_string()).await
    }

    // ========================================================================
    // Shared by cursor operations and node handles
    // ========================================================================

    /// Append a log line to each target node. Best-effort: a failed write is
    /// logged and the `log_added` event is still published.
    pub(crate) async fn log_to(&self, target: Target<'_>, level: LogLevel, message: String) {
        let ids = match self.resolve(target) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(trace_id = %self.inner.trace_id, error = %e, "cannot log to node");
                return;
            }
        };

        let now = now_secs();
        for node_id in ids {
            let log = TraceLog {
                timestamp: now,
                level,
                message: message.clone(),
                node_id,
            };
            if let Err(e) = self.inner.driver.save_log(&self.inner.trace_id, &log).await {
                warn!(
                    trace_id = %self.inner.trace_id,
                    node_id = %log.node_id,
                    error = %e,
                    "failed to persist trace log"
                );
            }
            let node_id = log.node_id.clone();
            self.publish(self.update(now, UpdateData::LogAdded(log)).for_node(node_id));
        }
    }

    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id))]
    pub(crate) async fn set_output_on(&self, target: Target<'_>, output: Value) -> Result<()> {
        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;
        let ids = self.resolve(target)?;
        let now = now_secs();

        self.apply_to_nodes(
            &ids,
            "failed to save output of node",
            |node| {
                node.output = Some(output.clone());
                node.updated_at = now;
            },
            |node| UpdateData::NodeUpdated(node.clone()),
        )
        .await
    }

    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id, key = %key))]
    pub(crate) async fn set_metadata_on(
        &self,
        target: Target<'_>,
        key: String,
        value: Value,
    ) -> Result<()> {
        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;
        let ids = self.resolve(target)?;
        let now = now_secs();

        self.apply_to_nodes(
            &ids,
            "failed to save metadata of node",
            |node| {
                node.set_metadata(key.as_str(), value.clone());
                node.updated_at = now;
            },
            |node| UpdateData::NodeUpdated(node.clone()),
        )
        .await
    }

    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id))]
    pub(crate) async fn complete_on(&self, target: Target<'_>, output: Option<Value>) -> Result<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;
        let ids = self.resolve(target)?;
        let now = now_secs();

        self.apply_to_nodes(
            &ids,
            "failed to complete node",
            |node| {
                if let Some(output) = &output {
                    node.output = Some(output.clone());
                }
                node.status = NodeStatus::Completed;
                node.end_time = now;
                node.updated_at = now;
            },
            |node| {
                UpdateData::NodeComplete(NodeCompleteData {
                    node_id: node.id.clone(),
                    status: CompleteStatus::Success,
                    end_time: node.end_time,
                    duration: node.duration_ms(),
                    output: node.output.clone(),
                })
            },
        )
        .await?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("trace.manager.complete", start.elapsed());

        Ok(())
    }

    #[instrument(skip_all, fields(trace_id = %self.inner.trace_id))]
    pub(crate) async fn fail_on(&self, target: Target<'_>, error: String) -> Result<()> {
        self.check_cancelled()?;
        let _gate = self.inner.op_gate.lock().await;

        self.log_to(target, LogLevel::Error, format!("Node failed: {}", error))
            .await;

        let ids = self.resolve(target)?;
        let now = now_secs();

        self.apply_to_nodes(
            &ids,
            "failed to save failed node",
            |node| {
                node.status = NodeStatus::Failed;
                node.end_time = now;
                node.updated_at = now;
            },
            |node| {
                UpdateData::NodeFailed(NodeFailedData {
                    node_id: node.id.clone(),
                    status: CompleteStatus::Failed,
                    end_time: node.end_time,
                    duration: node.duration_ms(),
                    error: error.clone(),
                })
            },
        )
        .await
    }

    // ========================================================================
    // Trace-level completion
    // ========================================================================

    /// Mark the whole trace complete. Only the first call publishes the
    /// `complete` event.
    pub fn mark_complete(&self) {
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        let now = now_secs();
        let total_duration = if self.inner.created_at > 0 {
            (now - self.inner.created_at) * 1000
        } else {
            0
        };

        self.publish(self.update(
            now,
            UpdateData::Complete(TraceCompleteData {
                trace_id: self.inner.trace_id.clone(),
                status: TraceStatus::Completed,
                total_duration,
            }),
        ));
        debug!(trace_id = %self.inner.trace_id, total_duration, "trace complete");
    }

    pub fn is_complete(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    pub fn driver(&self) -> &Arc<dyn TraceDriver> {
        &self.inner.driver
    }

    pub fn root_node(&self) -> TraceNode {
        let state = self.state();
        match state.nodes.get(&self.inner.root_id) {
            Some(root) => root.clone(),
            // The root is inserted at construction and never removed
            None => TraceNode::root(self.inner.root_id.as_str(), self.inner.created_at),
        }
    }

    /// Snapshots of the nodes under the cursor.
    pub fn current_nodes(&self) -> Vec<TraceNode> {
        let state = self.state();
        state
            .cursor
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect()
    }

    /// A node from memory, falling back to the driver.
    pub async fn node(&self, id: &str) -> Result<Option<TraceNode>> {
        let cached = self.state().nodes.get(id).cloned();
        if let Some(node) = cached {
            return Ok(Some(node));
        }
        self.inner
            .driver
            .load_node(&self.inner.trace_id, id)
            .await
            .map_err(|e| TraceError::persistence("failed to load node", e))
    }

    /// The persisted tree.
    pub async fn tree(&self) -> Result<Option<TraceTree>> {
        self.inner
            .driver
            .load_trace(&self.inner.trace_id)
            .await
            .map_err(|e| TraceError::persistence("failed to load trace", e))
    }

    /// Every node recorded by this manager, depth-first from the root.
    pub fn all_nodes(&self) -> Vec<TraceNode> {
        let nodes: Vec<TraceNode> = self.state().nodes.values().cloned().collect();
        TraceTree::assemble(nodes)
            .map(|tree| tree.flatten())
            .unwrap_or_default()
    }

    pub async fn logs(&self) -> Result<Vec<TraceLog>> {
        self.inner
            .driver
            .load_logs(&self.inner.trace_id, None)
            .await
            .map_err(|e| TraceError::persistence("failed to load logs", e))
    }

    pub async fn logs_for_node(&self, node_id: &str) -> Result<Vec<TraceLog>> {
        self.inner
            .driver
            .load_logs(&self.inner.trace_id, Some(node_id))
            .await
            .map_err(|e| TraceError::persistence("failed to load logs", e))
    }

    pub async fn trace_info(&self) -> Result<Option<TraceInfo>> {
        self.inner
            .driver
            .load_trace_info(&self.inner.trace_id)
            .await
            .map_err(|e| TraceError::persistence("failed to load trace info", e))
    }

    // ========================================================================
    // Updates
    // ========================================================================

    pub fn hub(&self) -> &UpdateHub {
        &self.inner.hub
    }

    /// Retained update history, oldest first.
    pub fn events(&self) -> Vec<TraceUpdate> {
        self.inner.hub.history()
    }

    pub fn events_since(&self, since: i64) -> Vec<TraceUpdate> {
        self.inner.hub.history_since(since)
    }

    pub fn subscribe(&self, id: impl Into<String>) -> Subscription {
        self.inner.hub.subscribe(id)
    }

    pub fn subscribe_anonymous(&self) -> Subscription {
        self.inner.hub.subscribe_anonymous()
    }

    pub fn subscribe_with_history(&self, id: impl Into<String>) -> (Vec<TraceUpdate>, Subscription) {
        self.inner.hub.subscribe_with_history(id)
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        self.inner.hub.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::trace::update::UpdateType;
    use serde_json::json;

    async fn manager() -> (TraceManager, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new());
        let manager = TraceManager::detached("trace-1", driver.clone()).await.unwrap();
        (manager, driver)
    }

    fn types(manager: &TraceManager) -> Vec<UpdateType> {
        manager.events().iter().map(|u| u.update_type).collect()
    }

    #[tokio::test]
    async fn test_new_creates_root_and_events() {
        let (manager, driver) = manager().await;
        let root = manager.root_node();

        assert!(root.is_root());
        assert_eq!(root.status, NodeStatus::Running);
        assert_eq!(root.option.label, "Root");
        assert_eq!(manager.current_nodes(), vec![root.clone()]);
        assert!(driver.load_node("trace-1", &root.id).await.unwrap().is_some());
        assert_eq!(types(&manager), vec![UpdateType::Init, UpdateType::NodeStart]);
        assert_eq!(manager.events()[1].node_id.as_deref(), Some(root.id.as_str()));
    }

    #[tokio::test]
    async fn test_new_fails_when_root_not_saved() {
        let driver = Arc::new(MemoryDriver::new());
        driver.fail_writes(true);
        let err = TraceManager::detached("t", driver).await.unwrap_err();
        assert!(err.is_persistence());
        assert!(err.to_string().starts_with("failed to save root node"));
    }

    #[tokio::test]
    async fn test_new_rejects_empty_id() {
        let driver = Arc::new(MemoryDriver::new());
        let err = TraceManager::detached("", driver).await.unwrap_err();
        assert!(matches!(err, TraceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_new_refuses_stored_trace() {
        let (first, driver) = manager().await;
        first.add(None, TraceNodeOption::labeled("A")).await.unwrap();

        let err = TraceManager::detached("trace-1", driver.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::Validation(_)));
        assert!(err.to_string().contains("trace already exists"));

        // The stored tree still has one root
        let roots = driver
            .load_nodes("trace-1")
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.parent_id.is_none())
            .count();
        assert_eq!(roots, 1);
        let tree = first.tree().await.unwrap().unwrap();
        assert_eq!(tree.node.id, first.root_node().id);
        assert_eq!(tree.len(), 2);
    }

    #[tokio::test]
    async fn test_add_is_sequential() {
        let (manager, _) = manager().await;
        let a = manager
            .add(Some(json!("q")), TraceNodeOption::labeled("A"))
            .await
            .unwrap();
        let b = manager.add(None, TraceNodeOption::labeled("B")).await.unwrap();

        let a_node = a.snapshot().unwrap();
        let b_node = b.snapshot().unwrap();
        assert_eq!(a_node.parent_id.as_deref(), Some(manager.root_node().id.as_str()));
        assert_eq!(b_node.parent_id.as_deref(), Some(a.id()));
        assert_eq!(a_node.children, vec![b.id().to_string()]);
        assert_eq!(a_node.input, Some(json!("q")));
        assert_eq!(manager.current_nodes()[0].id, b.id());
    }

    #[tokio::test]
    async fn test_parallel_then_add_joins() {
        let (manager, driver) = manager().await;
        let a = manager.add(None, TraceNodeOption::labeled("A")).await.unwrap();
        let branches = manager
            .parallel(vec![ParallelInput::labeled("B"), ParallelInput::labeled("C")])
            .await
            .unwrap();
        assert_eq!(manager.current_nodes().len(), 2);

        let d = manager.add(None, TraceNodeOption::labeled("D")).await.unwrap();
        let d_node = d.snapshot().unwrap();
        let join_id = d_node.parent_id.clone().unwrap();
        let join = manager.node(&join_id).await.unwrap().unwrap();

        assert!(join.is_join());
        assert_eq!(join.parent_id.as_deref(), Some(a.id()));
        assert_eq!(join.children, vec![d.id().to_string()]);
        assert_eq!(manager.current_nodes(), vec![d_node]);

        let a_node = a.snapshot().unwrap();
        assert_eq!(
            a_node.children,
            vec![
                branches[0].id().to_string(),
                branches[1].id().to_string(),
                join_id.clone()
            ]
        );
        assert!(driver.load_node("trace-1", &join_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_parallel_rejects_empty_and_nested() {
        let (manager, _) = manager().await;
        let err = manager.parallel(Vec::new()).await.unwrap_err();
        assert!(matches!(err, TraceError::Validation(_)));

        manager
            .parallel(vec![ParallelInput::labeled("B"), ParallelInput::labeled("C")])
            .await
            .unwrap();
        let err = manager
            .parallel(vec![ParallelInput::labeled("X")])
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::Validation(_)));
        assert_eq!(manager.current_nodes().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_sets_output_and_duration() {
        let (manager, _) = manager().await;
        manager.add(None, TraceNodeOption::labeled("A")).await.unwrap();
        manager.complete(Some(json!({"answer": 42}))).await.unwrap();

        let node = &manager.current_nodes()[0];
        assert_eq!(node.status, NodeStatus::Completed);
        assert!(node.end_time >= node.start_time);
        assert_eq!(node.output, Some(json!({"answer": 42})));

        let last = manager.events().pop().unwrap();
        assert_eq!(last.update_type, UpdateType::NodeComplete);
        match last.data {
            UpdateData::NodeComplete(data) => {
                assert_eq!(data.status, CompleteStatus::Success);
                assert_eq!(data.duration, (node.end_time - node.start_time) * 1000);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fail_logs_then_fails() {
        let (manager, driver) = manager().await;
        let a = manager.add(None, TraceNodeOption::labeled("A")).await.unwrap();
        manager.fail("model timed out").await.unwrap();

        assert_eq!(a.snapshot().unwrap().status, NodeStatus::Failed);
        let logs = driver.load_logs("trace-1", Some(a.id())).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(logs[0].message, "Node failed: model timed out");

        let tail: Vec<UpdateType> = types(&manager).into_iter().rev().take(2).collect();
        assert_eq!(tail, vec![UpdateType::NodeFailed, UpdateType::LogAdded]);
    }

    #[tokio::test]
    async fn test_set_metadata_and_output_emit_node_updated() {
        let (manager, _) = manager().await;
        manager.add(None, TraceNodeOption::labeled("A")).await.unwrap();
        manager.set_metadata("model", json!("small")).await.unwrap();
        manager.set_output(json!("partial")).await.unwrap();

        let node = &manager.current_nodes()[0];
        assert_eq!(node.metadata_value("model"), Some(&json!("small")));
        assert_eq!(node.output, Some(json!("partial")));

        let tail: Vec<UpdateType> = types(&manager).into_iter().rev().take(2).collect();
        assert_eq!(tail, vec![UpdateType::NodeUpdated, UpdateType::NodeUpdated]);
    }

    #[tokio::test]
    async fn test_logging_targets_every_cursor_node() {
        let (manager, driver) = manager().await;
        manager
            .parallel(vec![ParallelInput::labeled("B"), ParallelInput::labeled("C")])
            .await
            .unwrap();
        manager.info("working").await;

        assert_eq!(driver.load_logs("trace-1", None).await.unwrap().len(), 2);
        let added = types(&manager)
            .into_iter()
            .filter(|t| *t == UpdateType::LogAdded)
            .count();
        assert_eq!(added, 2);
    }

    #[tokio::test]
    async fn test_mark_complete_is_idempotent() {
        let (manager, _) = manager().await;
        assert!(!manager.is_complete());
        manager.mark_complete();
        manager.mark_complete();

        assert!(manager.is_complete());
        let completes = types(&manager)
            .into_iter()
            .filter(|t| *t == UpdateType::Complete)
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn test_all_nodes_depth_first() {
        let (manager, _) = manager().await;
        let a = manager.add(None, TraceNodeOption::labeled("A")).await.unwrap();
        let b = manager.add(None, TraceNodeOption::labeled("B")).await.unwrap();

        let ids: Vec<String> = manager.all_nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![manager.root_node().id, a.id().to_string(), b.id().to_string()]);
    }

    #[tokio::test]
    async fn test_builder_with_hub_config() {
        let driver = Arc::new(MemoryDriver::new());
        let manager = TraceManager::builder("t", driver)
            .hub_config(HubConfig {
                history_limit: 2,
                ..Default::default()
            })
            .build()
            .await
            .unwrap();
        manager.add(None, TraceNodeOption::labeled("A")).await.unwrap();
        assert_eq!(manager.events().len(), 2);
        assert_eq!(manager.events()[0].update_type, UpdateType::NodeStart);
    }
}
