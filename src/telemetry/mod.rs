// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics infrastructure.
//!
//! - **Logging**: `tracing` with an `EnvFilter` subscriber; `RUST_LOG` wins
//!   over the configured default level
//! - **Metrics**: per-operation latency and update delivery counters in
//!   [`GLOBAL_METRICS`], compiled in with the `telemetry` feature
//!
//! # Usage
//!
//! ```rust,ignore
//! use agent_trace::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{EventCounts, Histogram, Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS};
