// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! agent-trace entry point - inspect persisted traces and run a demo trace.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::json;

use agent_trace::config::{self, CliOptions, DriverKind, TraceConfig};
use agent_trace::telemetry::{init_telemetry, TelemetryConfig};
use agent_trace::{
    open_driver, NodeStatus, ParallelInput, TraceDriver, TraceNodeOption, TraceOption,
    TraceRegistry, TraceSpaceOption, TraceStatus, TraceTree,
};

/// agent-trace version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// agent-trace - inspect live execution traces of AI agent runs.
#[derive(Parser)]
#[command(name = "agent-trace")]
#[command(author, version, about = "Inspect AI agent execution traces", long_about = None)]
struct Cli {
    /// Config file to use instead of the workspace config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Persistence driver
    #[arg(short, long, global = true, env = "AGENT_TRACE_DRIVER")]
    driver: Option<Driver>,

    /// Storage directory (local) or database file (sqlite)
    #[arg(short, long, global = true, env = "AGENT_TRACE_PATH")]
    path: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available persistence drivers.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Driver {
    /// In-process only; nothing survives the command
    Memory,
    /// JSON files on disk
    Local,
    /// A single SQLite database
    Sqlite,
}

impl From<Driver> for DriverKind {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::Memory => DriverKind::Memory,
            Driver::Local => DriverKind::Local,
            Driver::Sqlite => DriverKind::Sqlite,
        }
    }
}

/// Subcommands for agent-trace.
#[derive(Subcommand)]
enum Commands {
    /// Print the node tree of a trace
    Show { trace_id: String },

    /// Print the logs of a trace
    Logs {
        trace_id: String,
        /// Only logs of this node
        #[arg(short, long)]
        node: Option<String>,
    },

    /// Print the memory spaces of a trace and their entries
    Spaces { trace_id: String },

    /// Print the trace info as JSON
    Info { trace_id: String },

    /// Delete everything stored for a trace
    Delete { trace_id: String },

    /// Record a sample fork/join trace, printing live updates as JSON lines
    Demo,

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
    /// Write an example workspace config file
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; a second subscriber is not an error worth failing on
    let _telemetry = init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose)).ok();

    let workspace_root = std::env::current_dir()?;
    let cli_options = CliOptions {
        driver: cli.driver.map(DriverKind::from),
        path: cli.path.clone(),
        history_limit: None,
    };

    match cli.command {
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                let config = resolve_config(&workspace_root, cli.config.as_deref(), cli_options)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            Some(ConfigAction::Init) => {
                let path = config::init_config(&workspace_root, None)?;
                println!("Created config file: {}", path.display());
            }
        },
        Commands::Version => {
            println!("agent-trace {}", VERSION);
        }
        Commands::Demo => {
            let config = resolve_config(&workspace_root, cli.config.as_deref(), cli_options)?;
            run_demo(&config).await?;
        }
        command => {
            let config = resolve_config(&workspace_root, cli.config.as_deref(), cli_options)?;
            let driver = open_driver(&config)?;
            let result = inspect(command, driver.as_ref()).await;
            driver.close().await?;
            result?;
        }
    }
    Ok(())
}

/// Merge global config, the explicit or discovered workspace config and CLI flags.
fn resolve_config(
    workspace_root: &Path,
    config_file: Option<&Path>,
    cli_options: CliOptions,
) -> anyhow::Result<TraceConfig> {
    let config = match config_file {
        Some(path) => {
            let global = config::load_global_config()?;
            let workspace = config::load_config_file(path)?;
            let merged = config::merge_config(global, Some(workspace), cli_options);
            merged.validate()?;
            merged
        }
        None => config::load_config(workspace_root, cli_options)?,
    };
    Ok(config)
}

async fn inspect(command: Commands, driver: &dyn TraceDriver) -> anyhow::Result<()> {
    match command {
        Commands::Show { trace_id } => {
            let tree = driver
                .load_trace(&trace_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("trace not found: {}", trace_id))?;
            println!("{} {}", "Trace".bright_blue().bold(), trace_id.bright_white());
            print_tree(&tree, "", true, true);
        }
        Commands::Logs { trace_id, node } => {
            let logs = driver.load_logs(&trace_id, node.as_deref()).await?;
            if logs.is_empty() {
                println!("{}", "No logs.".dimmed());
            }
            for log in logs {
                let time = chrono::DateTime::from_timestamp(log.timestamp, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| log.timestamp.to_string());
                let level = match log.level {
                    agent_trace::LogLevel::Error => "ERROR".red(),
                    agent_trace::LogLevel::Warn => "WARN ".yellow(),
                    agent_trace::LogLevel::Info => "INFO ".green(),
                    agent_trace::LogLevel::Debug => "DEBUG".dimmed(),
                };
                println!("{} {} {} {}", time.dimmed(), level, log.node_id.cyan(), log.message);
            }
        }
        Commands::Spaces { trace_id } => {
            let ids = driver.list_spaces(&trace_id).await?;
            if ids.is_empty() {
                println!("{}", "No spaces.".dimmed());
            }
            for id in ids {
                let Some(space) = driver.load_space(&trace_id, &id).await? else {
                    continue;
                };
                let label = if space.option.label.is_empty() {
                    space.id.as_str()
                } else {
                    space.option.label.as_str()
                };
                println!("{} [{}] {}", label.bright_white().bold(), space.id, space.option.space_type.dimmed());
                for key in driver.list_space_keys(&trace_id, &id).await? {
                    let value = driver
                        .get_space_key(&trace_id, &id, &key)
                        .await?
                        .unwrap_or(serde_json::Value::Null);
                    println!("  {} = {}", key.cyan(), value);
                }
            }
        }
        Commands::Info { trace_id } => {
            let info = driver
                .load_trace_info(&trace_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("trace not found: {}", trace_id))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Delete { trace_id } => {
            driver.delete_trace(&trace_id).await?;
            println!("Deleted trace {}", trace_id);
        }
        Commands::Demo | Commands::Config { .. } | Commands::Version => {}
    }
    Ok(())
}

fn print_tree(tree: &TraceTree, prefix: &str, last: bool, root: bool) {
    let node = &tree.node;
    let marker = match node.status {
        NodeStatus::Completed => "✓".green(),
        NodeStatus::Failed => "✗".red(),
        NodeStatus::Running => "●".yellow(),
    };
    let label = if node.option.label.is_empty() {
        node.id.as_str()
    } else {
        node.option.label.as_str()
    };
    let branch = match (root, last) {
        (true, _) => "",
        (false, true) => "└─ ",
        (false, false) => "├─ ",
    };
    let duration = if node.status.is_terminal() {
        format!(" {}ms", node.duration_ms()).dimmed().to_string()
    } else {
        String::new()
    };
    println!("{}{}{} {} {}{}", prefix, branch, marker, label.bright_white(), node.id.dimmed(), duration);

    let child_prefix = match (root, last) {
        (true, _) => prefix.to_string(),
        (false, true) => format!("{}   ", prefix),
        (false, false) => format!("{}│  ", prefix),
    };
    let count = tree.children.len();
    for (i, child) in tree.children.iter().enumerate() {
        print_tree(child, &child_prefix, i + 1 == count, false);
    }
}

/// Record a small research-style trace: plan, two parallel lookups, an
/// answer. Every update is printed as one JSON line on stdout.
async fn run_demo(config: &TraceConfig) -> anyhow::Result<()> {
    let registry = TraceRegistry::from_config(config)?;
    let (trace_id, manager) = registry
        .create(TraceOption::default().created_by("agent-trace demo"))
        .await?;

    let (history, mut feed) = manager.subscribe_with_history("demo");
    for update in history {
        println!("{}", update.to_json());
    }
    let printer = tokio::spawn(async move {
        while let Some(update) = feed.recv().await {
            println!("{}", update.to_json());
        }
    });

    let plan = manager
        .add(
            Some(json!({"question": "What is a trace?"})),
            TraceNodeOption::labeled("Plan").with_type("llm"),
        )
        .await?;
    plan.info("splitting the question into two lookups").await;
    plan.complete(Some(json!({"steps": 2}))).await?;

    let context = manager
        .create_space(TraceSpaceOption::labeled("Context").with_type("context"))
        .await?;

    let branches = manager
        .parallel(vec![
            ParallelInput::new(json!({"query": "trace definition"}))
                .with_option(TraceNodeOption::labeled("Search").with_type("tool")),
            ParallelInput::new(json!({"path": "README.md"}))
                .with_option(TraceNodeOption::labeled("Read").with_type("tool")),
        ])
        .await?;
    let handles: Vec<_> = branches
        .into_iter()
        .map(|branch| {
            let space_id = context.id.clone();
            tokio::spawn(async move {
                branch.info("working").await;
                branch
                    .manager()
                    .set_space_value(&space_id, branch.id(), json!("result"))
                    .await?;
                branch.complete(Some(json!("done"))).await
            })
        })
        .collect();
    for handle in handles {
        handle.await??;
    }

    let answer = manager
        .add(None, TraceNodeOption::labeled("Answer").with_type("llm"))
        .await?;
    answer.set_metadata("tokens", json!(128)).await?;
    answer
        .complete(Some(json!("A tree of steps with fork and join.")))
        .await?;

    registry.finish(&trace_id, TraceStatus::Completed).await?;
    manager.hub().close_all();
    printer.await?;

    eprintln!("{} {}", "Recorded trace".green(), trace_id.bright_white());
    let tree = manager.tree().await?;
    if let Some(tree) = tree {
        print_tree_to_stderr(&tree);
    }
    registry.driver().close().await?;
    Ok(())
}

fn print_tree_to_stderr(tree: &TraceTree) {
    for node in tree.flatten() {
        eprintln!("  {} {} ({})", node.status.as_str(), node.option.label, node.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "agent-trace",
            "show",
            "20260101000000000000",
            "--driver",
            "sqlite",
            "-vv",
        ])
        .unwrap();
        assert!(matches!(cli.driver, Some(Driver::Sqlite)));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Show { .. }));
    }

    #[test]
    fn test_cli_logs_node_filter() {
        let cli = Cli::try_parse_from(["agent-trace", "logs", "t", "--node", "n1"]).unwrap();
        match cli.command {
            Commands::Logs { trace_id, node } => {
                assert_eq!(trace_id, "t");
                assert_eq!(node.as_deref(), Some("n1"));
            }
            _ => panic!("expected logs"),
        }
    }

    #[test]
    fn test_driver_conversion() {
        assert_eq!(DriverKind::from(Driver::Local), DriverKind::Local);
        assert_eq!(DriverKind::from(Driver::Memory), DriverKind::Memory);
    }

    #[tokio::test]
    async fn test_demo_runs_on_memory_driver() {
        let config = TraceConfig::default();
        assert!(run_demo(&config).await.is_ok());
    }

    #[test]
    fn test_resolve_config_with_explicit_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("custom.json");
        std::fs::write(&file, r#"{"driver": "sqlite", "path": "/tmp/x.db"}"#).unwrap();
        let config = resolve_config(temp.path(), Some(&file), CliOptions::default()).unwrap();
        assert_eq!(config.driver, DriverKind::Sqlite);
        assert_eq!(config.path, Some(PathBuf::from("/tmp/x.db")));
    }
}
