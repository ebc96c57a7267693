// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! agent-trace - live execution traces for AI agent runs.
//!
//! A trace is a tree of steps. Sequential steps hang off the cursor, parallel
//! branches fork it, and the next sequential step joins them again. Every
//! change is persisted through a pluggable driver and streamed to
//! subscribers as a [`TraceUpdate`].
//!
//! # Architecture
//!
//! - [`types`] - Nodes, spaces, logs, trace info and their options
//! - [`error`] - Error types and result aliases
//! - [`trace`] - The manager, node handles, memory spaces, update hub and registry
//! - [`driver`] - Persistence: in-memory, JSON files on disk, SQLite
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Logging setup and operation metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agent_trace::{MemoryDriver, ParallelInput, TraceManager, TraceNodeOption};
//!
//! let manager = TraceManager::detached("run-1", Arc::new(MemoryDriver::new())).await?;
//! let mut feed = manager.subscribe("ui");
//!
//! manager.add(None, TraceNodeOption::labeled("Plan")).await?;
//! let branches = manager
//!     .parallel(vec![ParallelInput::labeled("Search"), ParallelInput::labeled("Read")])
//!     .await?;
//! branches[0].complete(None).await?;
//! branches[1].complete(None).await?;
//! manager.add(None, TraceNodeOption::labeled("Answer")).await?;
//! manager.mark_complete();
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod telemetry;
pub mod trace;
pub mod types;

// Re-export commonly used types at crate root
pub use driver::{open_driver, LocalDriver, MemoryDriver, SqliteDriver, TraceDriver};
pub use error::{ConfigError, DriverError, DriverResult, Result, TraceError};
pub use trace::{
    HubConfig, IdGenerator, NanoIdGenerator, NodeHandle, OverflowPolicy, Subscription,
    TraceManager, TraceManagerBuilder, TraceRegistry, TraceUpdate, UpdateData, UpdateHub,
    UpdateType,
};
pub use types::{
    // Node types
    NodeStatus, ParallelInput, TraceNode, TraceNodeOption, TraceTree,
    // Space types
    TraceSpace, TraceSpaceData, TraceSpaceOption,
    // Log and trace types
    LogLevel, TraceInfo, TraceLog, TraceOption, TraceStatus,
};

/// agent-trace version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _option = TraceNodeOption::labeled("step");
        let _space = TraceSpaceOption::labeled("context");
        let _driver = MemoryDriver::new();
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::DropEvent);
    }
}
