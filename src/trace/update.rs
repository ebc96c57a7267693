// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trace update events.
//!
//! A [`TraceUpdate`] is the envelope delivered to subscribers and kept in the
//! update history. Its serialized form is what downstream consumers render:
//!
//! ```json
//! {"type": "node_start", "trace_id": "...", "node_id": "...", "timestamp": 0, "data": {}}
//! ```

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::types::{TraceLog, TraceNode, TraceSpace, TraceStatus};

/// Kind of a trace update. The serialized names are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Init,
    NodeStart,
    NodeUpdated,
    NodeComplete,
    NodeFailed,
    LogAdded,
    SpaceCreated,
    SpaceDeleted,
    MemoryAdd,
    MemoryDelete,
    Complete,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::NodeStart => "node_start",
            Self::NodeUpdated => "node_updated",
            Self::NodeComplete => "node_complete",
            Self::NodeFailed => "node_failed",
            Self::LogAdded => "log_added",
            Self::SpaceCreated => "space_created",
            Self::SpaceDeleted => "space_deleted",
            Self::MemoryAdd => "memory_add",
            Self::MemoryDelete => "memory_delete",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion status carried in node and trace completion payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompleteStatus {
    Success,
    Failed,
}

/// Payload of an `init` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceInitData {
    pub trace_id: String,
    pub root_node: TraceNode,
}

/// Payload of a `node_start` event: one node, or a whole parallel batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStartData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<TraceNode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<TraceNode>>,
}

impl NodeStartData {
    pub fn single(node: TraceNode) -> Self {
        Self {
            node: Some(node),
            nodes: None,
        }
    }

    pub fn batch(nodes: Vec<TraceNode>) -> Self {
        Self {
            node: None,
            nodes: Some(nodes),
        }
    }

    /// IDs of all nodes started by this event.
    pub fn node_ids(&self) -> Vec<&str> {
        match (&self.node, &self.nodes) {
            (Some(node), _) => vec![node.id.as_str()],
            (None, Some(nodes)) => nodes.iter().map(|n| n.id.as_str()).collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// Payload of a `node_complete` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCompleteData {
    pub node_id: String,
    pub status: CompleteStatus,
    pub end_time: i64,
    /// Milliseconds
    pub duration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Payload of a `node_failed` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeFailedData {
    pub node_id: String,
    pub status: CompleteStatus,
    pub end_time: i64,
    /// Milliseconds
    pub duration: i64,
    pub error: String,
}

/// An entry written to a memory space, as rendered by consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryItem {
    /// The entry key
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: Value,
    pub timestamp: i64,
}

/// Payload of a `memory_add` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryAddData {
    /// Space type, or the space ID when the space has no type
    #[serde(rename = "type")]
    pub space_type: String,
    pub item: MemoryItem,
}

impl MemoryAddData {
    pub fn new(space: &TraceSpace, key: &str, value: Value, timestamp: i64) -> Self {
        let space_type = if space.option.space_type.is_empty() {
            space.id.clone()
        } else {
            space.option.space_type.clone()
        };
        let title = (!space.option.label.is_empty()).then(|| space.option.label.clone());
        Self {
            space_type: space_type.clone(),
            item: MemoryItem {
                id: key.to_string(),
                item_type: space_type,
                title,
                content: value,
                timestamp,
            },
        }
    }
}

/// Payload of a `memory_delete` event: one key, or every key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryDeleteData {
    pub space_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cleared: bool,
}

impl MemoryDeleteData {
    pub fn key(space_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            key: Some(key.into()),
            cleared: false,
        }
    }

    pub fn all(space_id: impl Into<String>) -> Self {
        Self {
            space_id: space_id.into(),
            key: None,
            cleared: true,
        }
    }
}

/// Payload of a `space_deleted` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceDeletedData {
    pub space_id: String,
}

/// Payload of the trace-level `complete` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceCompleteData {
    pub trace_id: String,
    pub status: TraceStatus,
    /// Milliseconds since the root node was created
    pub total_duration: i64,
}

/// Type-specific payload of an update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpdateData {
    Init(TraceInitData),
    NodeStart(NodeStartData),
    NodeUpdated(TraceNode),
    NodeComplete(NodeCompleteData),
    NodeFailed(NodeFailedData),
    LogAdded(TraceLog),
    SpaceCreated(TraceSpace),
    SpaceDeleted(SpaceDeletedData),
    MemoryAdd(MemoryAddData),
    MemoryDelete(MemoryDeleteData),
    Complete(TraceCompleteData),
}

impl UpdateData {
    /// The update type this payload belongs to.
    pub fn update_type(&self) -> UpdateType {
        match self {
            Self::Init(_) => UpdateType::Init,
            Self::NodeStart(_) => UpdateType::NodeStart,
            Self::NodeUpdated(_) => UpdateType::NodeUpdated,
            Self::NodeComplete(_) => UpdateType::NodeComplete,
            Self::NodeFailed(_) => UpdateType::NodeFailed,
            Self::LogAdded(_) => UpdateType::LogAdded,
            Self::SpaceCreated(_) => UpdateType::SpaceCreated,
            Self::SpaceDeleted(_) => UpdateType::SpaceDeleted,
            Self::MemoryAdd(_) => UpdateType::MemoryAdd,
            Self::MemoryDelete(_) => UpdateType::MemoryDelete,
            Self::Complete(_) => UpdateType::Complete,
        }
    }
}

/// Immutable event describing a change to a trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceUpdate {
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    pub timestamp: i64,
    pub data: UpdateData,
}

impl TraceUpdate {
    /// Create an update; the type is derived from the payload.
    pub fn new(trace_id: impl Into<String>, timestamp: i64, data: UpdateData) -> Self {
        Self {
            update_type: data.update_type(),
            trace_id: trace_id.into(),
            node_id: None,
            space_id: None,
            timestamp,
            data,
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn for_space(mut self, space_id: impl Into<String>) -> Self {
        self.space_id = Some(space_id.into());
        self
    }

    /// Serialize as a single JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TraceNode, TraceSpaceOption};
    use serde_json::json;

    #[test]
    fn test_update_type_names_are_stable() {
        let all = [
            (UpdateType::Init, "init"),
            (UpdateType::NodeStart, "node_start"),
            (UpdateType::NodeUpdated, "node_updated"),
            (UpdateType::NodeComplete, "node_complete"),
            (UpdateType::NodeFailed, "node_failed"),
            (UpdateType::LogAdded, "log_added"),
            (UpdateType::SpaceCreated, "space_created"),
            (UpdateType::SpaceDeleted, "space_deleted"),
            (UpdateType::MemoryAdd, "memory_add"),
            (UpdateType::MemoryDelete, "memory_delete"),
            (UpdateType::Complete, "complete"),
        ];
        for (ty, name) in all {
            assert_eq!(ty.as_str(), name);
            assert_eq!(serde_json::to_value(ty).unwrap(), json!(name));
        }
    }

    #[test]
    fn test_envelope_shape() {
        let node = TraceNode::root("r1", 7);
        let update = TraceUpdate::new("t1", 7, UpdateData::NodeStart(NodeStartData::single(node)))
            .for_node("r1");
        let value: Value = serde_json::from_str(&update.to_json()).unwrap();

        assert_eq!(value["type"], "node_start");
        assert_eq!(value["trace_id"], "t1");
        assert_eq!(value["node_id"], "r1");
        assert!(value.get("space_id").is_none());
        assert_eq!(value["data"]["node"]["id"], "r1");
        assert!(value["data"].get("nodes").is_none());
    }

    #[test]
    fn test_batch_node_start() {
        let nodes = vec![
            TraceNode::root("a", 1),
            TraceNode::root("b", 1),
        ];
        let data = NodeStartData::batch(nodes);
        assert_eq!(data.node_ids(), vec!["a", "b"]);
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["nodes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_memory_delete_shapes() {
        let one = serde_json::to_value(MemoryDeleteData::key("s", "k")).unwrap();
        assert_eq!(one, json!({"space_id": "s", "key": "k"}));

        let all = serde_json::to_value(MemoryDeleteData::all("s")).unwrap();
        assert_eq!(all, json!({"space_id": "s", "cleared": true}));
    }

    #[test]
    fn test_memory_add_uses_space_type() {
        let space = TraceSpace::new("s1", TraceSpaceOption::labeled("Ctx").with_type("context"), 1);
        let data = MemoryAddData::new(&space, "k", json!("v"), 9);
        assert_eq!(data.space_type, "context");
        assert_eq!(data.item.id, "k");
        assert_eq!(data.item.title.as_deref(), Some("Ctx"));

        let untyped = TraceSpace::new("s2", TraceSpaceOption::default(), 1);
        let data = MemoryAddData::new(&untyped, "k", json!(1), 9);
        assert_eq!(data.space_type, "s2");
        assert!(data.item.title.is_none());
    }
}
