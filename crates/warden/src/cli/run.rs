use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;

use warden::Warden;

use super::{init_tracing, load_config};

/// Run this node.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "warden.toml")]
    pub config: String,

    /// Node name (overrides config and host name).
    #[arg(short, long)]
    pub node: Option<String>,

    /// Do not self-upgrade at startup.
    #[arg(long)]
    pub no_update: bool,

    /// Verbose logging.
    #[arg(long)]
    pub dev: bool,
}

impl RunCommand {
    pub async fn execute(self) -> Result<()> {
        let mut config = load_config(&self.config)?;
        if let Some(node) = self.node.clone() {
            config.node.name = Some(node);
        }
        init_tracing(&config.logging, self.dev);

        println!();
        println!(
            "  {} v{}",
            style("WARDEN").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "  {} Node {} in guild {}",
            style("→").dim(),
            style(warden::node_name(&config)).bold(),
            config.node.guild_id
        );
        println!();

        info!("Loaded configuration from {}", self.config);

        let node = Warden::builder()
            .config(config)
            .no_update(self.no_update)
            .build()?;
        node.run().await?;

        println!("\n  {} Goodbye!", style("✓").green());
        Ok(())
    }
}
