// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.agent-trace/config.json
//! - Workspace config: .agent-trace.json, .agent-trace/config.json, or agent-trace.config.json
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{DriverKind, TraceConfig, WorkspaceConfig};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate all configuration sources for a workspace.
pub fn load_config(workspace_root: &Path, cli_options: CliOptions) -> Result<TraceConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;

    let config = merge_config(global, workspace, cli_options);
    config.validate()?;
    Ok(config)
}
