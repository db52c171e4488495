//! `cortex-plugins` - manage plugins for a Cortex service from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cortex_plugin_host::{JsonFileStore, PluginHostConfig, PluginManager, default_config_path};

mod commands;

use commands::PluginCommand;

/// Cortex plugin manager.
#[derive(Debug, Parser)]
#[command(name = "cortex-plugins", version, about)]
struct Cli {
    /// Path to the plugin host configuration file
    #[arg(long, short = 'c', global = true, env = "CORTEX_PLUGIN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", env = "CORTEX_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: PluginCommand,
}

impl Cli {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "warn,cortex_plugin_host={0},cortex_plugin_cli={0}",
                self.log_level
            ))
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.filter())
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = PluginHostConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    tracing::debug!("Using plugin host config {:?}", config_path);

    let store = Arc::new(
        JsonFileStore::open(&config.state_file)
            .with_context(|| format!("Failed to open {}", config.state_file.display()))?,
    );
    let manager = PluginManager::new(config, store).await?;

    let report = manager.initialize().await;
    for (identity, error) in &report.failed {
        tracing::warn!(plugin = %identity, "Not loaded: {}", error);
    }

    let result = cli.command.run(&manager).await;
    manager.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from(["cortex-plugins", "add", "a/b/c@dev"]).unwrap();
        assert!(matches!(cli.command, PluginCommand::Add { ref reference } if reference == "a/b/c@dev"));
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cortex-plugins",
            "update",
            "--log-level",
            "debug",
            "-c",
            "/tmp/host.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, PluginCommand::Update { reference: None }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/host.toml")));
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_remove_aliases() {
        for alias in ["remove", "rm", "uninstall"] {
            let cli = Cli::try_parse_from(["cortex-plugins", alias, "dragory"]).unwrap();
            assert!(matches!(cli.command, PluginCommand::Remove { .. }));
        }
    }

    #[test]
    fn test_add_requires_reference() {
        assert!(Cli::try_parse_from(["cortex-plugins", "add"]).is_err());
    }
}
