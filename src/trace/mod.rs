// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trace recording: the manager, its node handles, memory spaces, the update
//! hub and the registry of live traces.

pub mod hub;
pub mod id;
mod manager;
mod node;
mod registry;
mod space;
pub mod update;

pub use hub::{HubConfig, OverflowPolicy, Subscription, UpdateHub};
pub use id::{IdGenerator, NanoIdGenerator};
pub use manager::{ManagerOptions, TraceManager, TraceManagerBuilder};
pub use node::NodeHandle;
pub use registry::TraceRegistry;
pub use update::{
    CompleteStatus, MemoryAddData, MemoryDeleteData, MemoryItem, NodeCompleteData,
    NodeFailedData, NodeStartData, SpaceDeletedData, TraceCompleteData, TraceInitData,
    TraceUpdate, UpdateData, UpdateType,
};
