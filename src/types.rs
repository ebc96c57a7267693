// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for agent traces.
//!
//! This module defines the value types recorded by a trace: nodes, memory
//! spaces, log lines and trace-level metadata. Input, output and metadata
//! payloads are opaque `serde_json::Value`s resolved by the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Current time as Unix seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// Node Types
// ============================================================================

/// Execution status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
}

impl NodeStatus {
    /// Whether the node has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display options for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceNodeOption {
    /// Display label in the UI
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,

    /// Node type identifier
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub node_type: String,

    /// Icon identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl TraceNodeOption {
    /// Create an option with just a label.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One step in the execution tree.
///
/// Children are stored as IDs in discovery order; use [`TraceTree`] for the
/// nested view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    pub id: String,

    /// Parent node ID, absent only for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub children: Vec<String>,

    #[serde(flatten)]
    pub option: TraceNodeOption,

    pub status: NodeStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Arbitrary metadata, created on first write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    pub created_at: i64,
    pub start_time: i64,

    /// Zero until the node completes or fails
    #[serde(default)]
    pub end_time: i64,

    pub updated_at: i64,
}

impl TraceNode {
    /// Create a running node.
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<String>,
        option: TraceNodeOption,
        input: Option<Value>,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id,
            children: Vec::new(),
            option,
            status: NodeStatus::Running,
            input,
            output: None,
            metadata: None,
            created_at: now,
            start_time: now,
            end_time: 0,
            updated_at: now,
        }
    }

    /// Create the running root node of a trace.
    pub fn root(id: impl Into<String>, now: i64) -> Self {
        Self::new(
            id,
            None,
            TraceNodeOption::labeled("Root").with_icon("root"),
            None,
            now,
        )
    }

    /// Create a join node: a zero-duration convergence point that is
    /// completed on creation.
    pub fn join(id: impl Into<String>, parent_id: Option<String>, now: i64) -> Self {
        let mut node = Self::new(
            id,
            parent_id,
            TraceNodeOption::labeled("Join").with_icon("join"),
            None,
            now,
        );
        node.status = NodeStatus::Completed;
        node.end_time = now;
        node
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_join(&self) -> bool {
        self.status == NodeStatus::Completed
            && self.start_time == self.end_time
            && self.option.icon == "join"
    }

    /// Duration in milliseconds; zero while running.
    pub fn duration_ms(&self) -> i64 {
        if self.end_time == 0 {
            return 0;
        }
        (self.end_time - self.start_time) * 1000
    }

    /// Set a metadata key, creating the map if needed.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
    }

    /// Get a metadata value by key.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

/// Input and display options for one branch of a parallel fork.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default)]
    pub option: TraceNodeOption,
}

impl ParallelInput {
    pub fn new(input: Value) -> Self {
        Self {
            input: Some(input),
            option: TraceNodeOption::default(),
        }
    }

    /// Create a branch with only a label and no input.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            input: None,
            option: TraceNodeOption::labeled(label),
        }
    }

    pub fn with_option(mut self, option: TraceNodeOption) -> Self {
        self.option = option;
        self
    }
}

/// Nested view of a trace, assembled from a flat node set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceTree {
    pub node: TraceNode,
    pub children: Vec<TraceTree>,
}

impl TraceTree {
    /// Assemble a tree from flat nodes, starting at the node without a parent.
    ///
    /// Child IDs that do not resolve to a node are skipped. Returns `None`
    /// when no root is present.
    pub fn assemble(nodes: impl IntoIterator<Item = TraceNode>) -> Option<Self> {
        let mut by_id: HashMap<String, TraceNode> = nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();

        let root_id = by_id.values().find(|n| n.is_root())?.id.clone();
        let mut visited = HashSet::new();
        Self::build(&root_id, &mut by_id, &mut visited)
    }

    fn build(
        id: &str,
        by_id: &mut HashMap<String, TraceNode>,
        visited: &mut HashSet<String>,
    ) -> Option<Self> {
        if !visited.insert(id.to_string()) {
            return None;
        }
        let node = by_id.remove(id)?;
        let children = node
            .children
            .iter()
            .filter_map(|child_id| Self::build(child_id, by_id, visited))
            .collect();
        Some(Self { node, children })
    }

    /// All nodes in depth-first order.
    pub fn flatten(&self) -> Vec<TraceNode> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<TraceNode>) {
        out.push(self.node.clone());
        for child in &self.children {
            child.collect(out);
        }
    }

    /// Find a subtree by node ID.
    pub fn find(&self, id: &str) -> Option<&TraceTree> {
        if self.node.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Total number of nodes in the tree.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TraceTree::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

// ============================================================================
// Space Types
// ============================================================================

/// Display options for a memory space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSpaceOption {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,

    /// Space type identifier (e.g. "context", "intent", "knowledge")
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub space_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Time to live in seconds, for display only (0 = no expiration)
    #[serde(default)]
    pub ttl: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TraceSpaceOption {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, space_type: impl Into<String>) -> Self {
        self.space_type = space_type.into();
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }
}

/// Metadata record of a trace-scoped key/value store.
///
/// Entries live in the driver, never in this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpace {
    pub id: String,

    #[serde(flatten)]
    pub option: TraceSpaceOption,

    pub created_at: i64,
    pub updated_at: i64,
}

impl TraceSpace {
    pub fn new(id: impl Into<String>, option: TraceSpaceOption, now: i64) -> Self {
        Self {
            id: id.into(),
            option,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A space together with all of its entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSpaceData {
    #[serde(flatten)]
    pub space: TraceSpace,
    pub data: BTreeMap<String, Value>,
}

// ============================================================================
// Log Types
// ============================================================================

/// Severity of a trace log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only log line attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceLog {
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    pub node_id: String,
}

// ============================================================================
// Trace Types
// ============================================================================

/// Lifecycle status of a whole trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace-level metadata, persisted independently of the node tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub id: String,

    /// Name of the driver the trace was recorded with
    pub driver: String,

    pub status: TraceStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Options for creating a trace through the registry.
#[derive(Debug, Clone, Default)]
pub struct TraceOption {
    /// Trace ID to use; generated when absent
    pub id: Option<String>,
    pub created_by: Option<String>,
    pub team_id: Option<String>,
    pub tenant_id: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl TraceOption {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn created_by(mut self, owner: impl Into<String>) -> Self {
        self.created_by = Some(owner.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, parent: Option<&str>, children: &[&str]) -> TraceNode {
        let mut n = TraceNode::new(
            id,
            parent.map(String::from),
            TraceNodeOption::labeled(id),
            None,
            100,
        );
        n.children = children.iter().map(|c| c.to_string()).collect();
        n
    }

    #[test]
    fn test_root_node() {
        let root = TraceNode::root("r", 10);
        assert!(root.is_root());
        assert_eq!(root.status, NodeStatus::Running);
        assert_eq!(root.option.label, "Root");
        assert_eq!(root.duration_ms(), 0);
    }

    #[test]
    fn test_join_node_is_zero_duration() {
        let join = TraceNode::join("j", Some("a".to_string()), 42);
        assert_eq!(join.status, NodeStatus::Completed);
        assert_eq!(join.start_time, join.end_time);
        assert!(join.is_join());
        assert_eq!(join.duration_ms(), 0);
    }

    #[test]
    fn test_metadata_created_lazily() {
        let mut n = node("a", None, &[]);
        assert!(n.metadata.is_none());
        n.set_metadata("model", json!("gpt"));
        assert_eq!(n.metadata_value("model"), Some(&json!("gpt")));
    }

    #[test]
    fn test_node_serialization_shape() {
        let mut n = node("a", Some("r"), &["b"]);
        n.option.node_type = "llm".to_string();
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["id"], "a");
        assert_eq!(value["parent_id"], "r");
        assert_eq!(value["type"], "llm");
        assert_eq!(value["status"], "running");
        assert!(value.get("output").is_none());

        let root = serde_json::to_value(TraceNode::root("r", 1)).unwrap();
        assert!(root.get("parent_id").is_none());
    }

    #[test]
    fn test_node_deserialize_roundtrip_preserves_option() {
        let n = node("a", Some("r"), &["b", "c"]);
        let text = serde_json::to_string(&n).unwrap();
        let back: TraceNode = serde_json::from_str(&text).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn test_tree_assemble() {
        let nodes = vec![
            node("b", Some("a"), &[]),
            node("r", None, &["a"]),
            node("a", Some("r"), &["b", "c"]),
            node("c", Some("a"), &[]),
        ];
        let tree = TraceTree::assemble(nodes).unwrap();
        assert_eq!(tree.node.id, "r");
        assert_eq!(tree.len(), 4);

        let ids: Vec<String> = tree.flatten().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["r", "a", "b", "c"]);
        assert_eq!(tree.find("a").unwrap().children.len(), 2);
    }

    #[test]
    fn test_tree_skips_missing_children() {
        let nodes = vec![node("r", None, &["ghost", "a"]), node("a", Some("r"), &[])];
        let tree = TraceTree::assemble(nodes).unwrap();
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_tree_without_root() {
        let nodes = vec![node("a", Some("r"), &[])];
        assert!(TraceTree::assemble(nodes).is_none());
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        let json = serde_json::to_string(&LogLevel::Error).unwrap();
        assert_eq!(json, "\"error\"");
    }

    #[test]
    fn test_space_flattened_option() {
        let space = TraceSpace::new("s1", TraceSpaceOption::labeled("Context").with_type("context"), 5);
        let value = serde_json::to_value(&space).unwrap();
        assert_eq!(value["label"], "Context");
        assert_eq!(value["type"], "context");
        assert_eq!(value["ttl"], 0);
    }
}
