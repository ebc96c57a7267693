// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::trace::hub::{HubConfig, OverflowPolicy, DEFAULT_HISTORY_LIMIT, DEFAULT_SUBSCRIBER_BUFFER};

use super::loader::get_global_config_dir;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Memory,
    Local,
    Sqlite,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local => "local",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" => Ok(Self::Local),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::invalid(
                "driver",
                format!("unknown driver '{}', expected memory, local or sqlite", other),
            )),
        }
    }
}

/// Workspace configuration.
/// Can be defined in .agent-trace.json or .agent-trace/config.json in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Storage backend (memory, local, sqlite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverKind>,

    /// Directory for the local driver, database file for sqlite
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Updates retained per trace for replay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,

    /// Queue capacity of each subscriber
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_buffer: Option<usize>,

    /// What to do when a subscriber falls behind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overflow_policy: Option<OverflowPolicy>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceConfig {
    pub driver: DriverKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub history_limit: usize,
    pub subscriber_buffer: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Memory,
            path: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            overflow_policy: OverflowPolicy::DropEvent,
        }
    }
}

impl TraceConfig {
    /// Check limits that would make the hub unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 {
            return Err(ConfigError::invalid("historyLimit", "must be greater than zero"));
        }
        if self.subscriber_buffer == 0 {
            return Err(ConfigError::invalid(
                "subscriberBuffer",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Storage location: the configured path, or a default under
    /// `~/.agent-trace/`. `None` for the memory driver.
    pub fn storage_path(&self) -> Option<PathBuf> {
        match self.driver {
            DriverKind::Memory => None,
            DriverKind::Local => self
                .path
                .clone()
                .or_else(|| get_global_config_dir().map(|dir| dir.join("traces"))),
            DriverKind::Sqlite => self
                .path
                .clone()
                .or_else(|| get_global_config_dir().map(|dir| dir.join("traces.db"))),
        }
    }

    /// Hub settings derived from this configuration.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            history_limit: self.history_limit,
            subscriber_buffer: self.subscriber_buffer,
            overflow: self.overflow_policy,
        }
    }
}
