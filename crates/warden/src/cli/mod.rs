mod instance;
mod migrate;
mod run;

pub use instance::InstanceCommand;
pub use migrate::MigrateCommand;
pub use run::RunCommand;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warden_core::config::{LoggingConfig, WardenConfig};

/// warden - fleet coordination for game-server nodes
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run this node.
    Run(RunCommand),

    /// Apply database migrations.
    Migrate(MigrateCommand),

    /// Manage local game-server instances.
    Instance(InstanceCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Migrate(cmd) => cmd.execute().await,
            Commands::Instance(cmd) => cmd.execute().await,
        }
    }
}

/// Load `.env` and the configuration file.
pub(crate) fn load_config(path: &str) -> Result<WardenConfig> {
    dotenvy::dotenv().ok();

    if !Path::new(path).exists() {
        anyhow::bail!("Configuration file not found: {}", path);
    }
    Ok(WardenConfig::from_file(path)?)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub(crate) fn init_tracing(logging: &LoggingConfig, dev: bool) {
    let level = if dev { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["warden", "run", "-n", "node-a", "--no-update"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_instance_add() {
        let cli = Cli::try_parse_from(["warden", "instance", "add", "alpha", "--template", "main"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["warden", "generate"]).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(load_config("/nonexistent/warden.toml").is_err());
    }
}
