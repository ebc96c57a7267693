// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{DriverKind, TraceConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub driver: Option<DriverKind>,
    pub path: Option<PathBuf>,
    pub history_limit: Option<usize>,
}

/// Default configuration values.
pub fn default_config() -> TraceConfig {
    TraceConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace config (.agent-trace.json)
/// 3. Global config (~/.agent-trace/config.json)
/// 4. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> TraceConfig {
    let mut result = default_config();

    if let Some(config) = global {
        apply_workspace_config(&mut result, &config);
    }

    if let Some(config) = workspace {
        apply_workspace_config(&mut result, &config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut TraceConfig, config: &WorkspaceConfig) {
    if let Some(driver) = config.driver {
        result.driver = driver;
    }

    if config.path.is_some() {
        result.path = config.path.clone();
    }

    if let Some(limit) = config.history_limit {
        result.history_limit = limit;
    }

    if let Some(buffer) = config.subscriber_buffer {
        result.subscriber_buffer = buffer;
    }

    if let Some(policy) = config.overflow_policy {
        result.overflow_policy = policy;
    }
}

fn apply_cli_options(result: &mut TraceConfig, cli: &CliOptions) {
    if let Some(driver) = cli.driver {
        result.driver = driver;
    }

    if cli.path.is_some() {
        result.path = cli.path.clone();
    }

    if let Some(limit) = cli.history_limit {
        result.history_limit = limit;
    }
}
