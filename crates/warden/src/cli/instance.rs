use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use warden_runtime::cluster::PgCoordinationStore;
use warden_runtime::{Database, InstanceRegistry};

use super::load_config;

/// Manage local game-server instances.
#[derive(Parser)]
pub struct InstanceCommand {
    #[command(subcommand)]
    pub action: InstanceAction,

    /// Configuration file path.
    #[arg(short, long, default_value = "warden.toml", global = true)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum InstanceAction {
    /// Create an instance with the next free ports.
    Add {
        name: String,

        /// Copy configuration files from this instance.
        #[arg(long)]
        template: Option<String>,
    },

    /// Delete an instance.
    Delete {
        name: String,

        /// Also remove the instance's home directory.
        #[arg(long)]
        remove_files: bool,
    },

    /// Rename an instance.
    Rename { name: String, new_name: String },

    /// List instances.
    List,
}

impl InstanceCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;
        let db = Database::connect_with_retry(&config.database).await?;
        let registry = InstanceRegistry::load(
            warden::node_name(&config),
            &config.node.instances_file,
            &config.node.instances_root,
            Arc::new(PgCoordinationStore::new(db.pool().clone())),
        )?;

        let result = run_action(&registry, self.action).await;
        db.close().await;
        result
    }
}

async fn run_action(registry: &InstanceRegistry, action: InstanceAction) -> Result<()> {
    match action {
        InstanceAction::Add { name, template } => {
            let instance = registry.add_instance(&name, template.as_deref()).await?;
            println!(
                "  {} Instance {} added (bot {}, game {}, web {})",
                style("✓").green(),
                style(&name).bold(),
                instance.ports.bot_port,
                instance.ports.game_port,
                instance.ports.webgui_port
            );
        }
        InstanceAction::Delete { name, remove_files } => {
            registry.delete_instance(&name, remove_files).await?;
            println!("  {} Instance {} deleted", style("✓").green(), name);
        }
        InstanceAction::Rename { name, new_name } => {
            registry.rename_instance(&name, &new_name).await?;
            println!(
                "  {} Instance {} renamed to {}",
                style("✓").green(),
                name,
                new_name
            );
        }
        InstanceAction::List => {
            let instances = registry.instances().await;
            if instances.is_empty() {
                println!("  {} No instances", style("ℹ").blue());
            }
            for (name, instance) in instances {
                println!(
                    "  {} {:<16} {:>5} {:>5} {:>5}  {}  {}",
                    style("•").dim(),
                    name,
                    instance.ports.bot_port,
                    instance.ports.game_port,
                    instance.ports.webgui_port,
                    instance.home.display(),
                    instance.server.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use warden_runtime::MemoryCoordinationStore;

    #[test]
    fn test_parse_delete() {
        let cmd =
            InstanceCommand::try_parse_from(["instance", "delete", "alpha", "--remove-files"])
                .unwrap();
        assert!(matches!(
            cmd.action,
            InstanceAction::Delete { remove_files: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_actions_against_registry() {
        let dir = TempDir::new().unwrap();
        let registry = InstanceRegistry::load(
            "node1",
            dir.path().join("instances.toml"),
            dir.path().join("instances"),
            Arc::new(MemoryCoordinationStore::new()),
        )
        .unwrap();

        let add = InstanceAction::Add {
            name: "alpha".into(),
            template: None,
        };
        run_action(&registry, add).await.unwrap();
        run_action(
            &registry,
            InstanceAction::Rename {
                name: "alpha".into(),
                new_name: "bravo".into(),
            },
        )
        .await
        .unwrap();
        run_action(&registry, InstanceAction::List).await.unwrap();

        assert!(registry.get("bravo").await.is_some());
        assert!(run_action(
            &registry,
            InstanceAction::Delete {
                name: "alpha".into(),
                remove_files: false
            }
        )
        .await
        .is_err());
    }
}
