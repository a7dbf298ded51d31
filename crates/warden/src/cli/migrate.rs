use std::path::Path;

use anyhow::Result;
use clap::Parser;
use console::style;

use warden_runtime::migrations::{load_migrations_from_dir, MigrationRunner};
use warden_runtime::Database;

use super::{init_tracing, load_config};

/// Apply the built-in migrations and any extra ones from a directory.
#[derive(Parser)]
pub struct MigrateCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "warden.toml")]
    pub config: String,

    /// Directory of extra migrations.
    #[arg(short, long, default_value = "migrations")]
    pub migrations_dir: String,
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;
        init_tracing(&config.logging, false);

        let extra = load_migrations_from_dir(Path::new(&self.migrations_dir))?;
        let db = Database::connect_with_retry(&config.database).await?;

        println!();
        println!("  {} Migrations", style("WARDEN").bold().cyan());
        println!();
        println!(
            "  {} Running pending migrations ({} extra)...",
            style("→").dim(),
            extra.len()
        );

        let result = MigrationRunner::new(db.pool().clone()).run(extra).await;
        db.close().await;
        result?;

        println!("  {} Migrations complete", style("✓").green());
        println!();
        Ok(())
    }
}
