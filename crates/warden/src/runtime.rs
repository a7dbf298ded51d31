//! Node runtime.
//!
//! Wires the coordination core together for one node:
//! - heartbeat and master election
//! - schema ownership while master
//! - command relay for fleet instructions
//! - node self-upgrade and the game update cycle
//! - local instance registry

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use warden_core::cluster::{FleetVersion, GuildId, NodeIdentity, NodeRole};
use warden_core::config::WardenConfig;
use warden_core::error::{Result, WardenError};
use warden_core::instance::GameServer;
use warden_runtime::cluster::{
    CommandRelay, GracefulShutdown, HeartbeatConfig, HeartbeatEngine, PgCoordinationStore,
    ShutdownConfig,
};
use warden_runtime::db::Database;
use warden_runtime::instances::InstanceRegistry;
use warden_runtime::migrations::{load_migrations_from_dir, Migration, MigrationRunner};
use warden_runtime::upgrade::{
    ExecSupervisor, GameInstallation, Handoff, HttpGameVersionSource, OrchestratorConfig,
    ProcessSupervisor, ReleaseChecker, UpdateHooks, UpdaterProcess, UpgradeOrchestrator,
};

/// Prelude module for common imports.
pub mod prelude {
    pub use warden_core::config::WardenConfig;
    pub use warden_core::error::{Result, WardenError};
    pub use warden_core::instance::{Coalition, GameServer, ServerError, ServerStatus};
    pub use warden_runtime::upgrade::{HookStage, UpdateHooks};

    pub use crate::{Warden, WardenBuilder};
}

/// Name of this node: the configured one, or the host name.
pub fn node_name(config: &WardenConfig) -> String {
    config.node.name.clone().unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    })
}

/// A warden node.
pub struct Warden {
    config: WardenConfig,
    allow_update: bool,
    migrations_dir: PathBuf,
    extra_migrations: Vec<Migration>,
    servers: Vec<(String, Arc<dyn GameServer>)>,
    hooks: Arc<UpdateHooks>,
}

impl Warden {
    pub fn builder() -> WardenBuilder {
        WardenBuilder::new()
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Hooks run around every game update.
    pub fn hooks(&self) -> Arc<UpdateHooks> {
        self.hooks.clone()
    }

    /// Run the node until interrupted or replaced by an upgrade.
    pub async fn run(self) -> Result<()> {
        let name = node_name(&self.config);
        let guild = GuildId(self.config.node.guild_id);
        tracing::info!(node = %name, guild = %guild, version = %FleetVersion::current(), "Node starting");

        let db = Database::connect_with_retry(&self.config.database).await?;
        let pool = db.pool().clone();
        let store = Arc::new(PgCoordinationStore::new(pool.clone()));

        let releases = ReleaseChecker::new(&self.config.node.install_dir, &self.config.update)?.shared();
        let (action_tx, action_rx) = mpsc::channel(16);

        let identity = NodeIdentity::new(guild, name.clone(), FleetVersion::current())
            .preferred(self.config.node.preferred_master);
        let heartbeat = Arc::new(
            HeartbeatEngine::new(
                store.clone(),
                identity,
                HeartbeatConfig::from(&self.config.cluster),
            )
            .with_release_source(releases.clone())
            .with_upgrade_sender(action_tx.clone()),
        );

        if let Err(e) = heartbeat.register().await {
            tracing::debug!(error = %e, "Node not registered yet");
        }

        // A fresh database has no schema; the first tick then reports master
        // so this node creates it.
        if heartbeat.tick().await {
            let mut migrations = load_migrations_from_dir(&self.migrations_dir)?;
            migrations.extend(self.extra_migrations);
            MigrationRunner::new(pool.clone()).run(migrations).await?;
            tracing::info!("Database schema is up to date");

            heartbeat.register().await?;
            heartbeat.tick().await;
        }
        tracing::info!(role = %heartbeat.role(), "Joined cluster");

        let registry = Arc::new(InstanceRegistry::load(
            name.clone(),
            &self.config.node.instances_file,
            &self.config.node.instances_root,
            store.clone(),
        )?);
        for (instance, server) in self.servers {
            registry.attach(&instance, server);
        }
        if let Err(e) = registry.sync_store().await {
            tracing::warn!(error = %e, "Failed to publish instances");
        }

        let shutdown = Arc::new(GracefulShutdown::new(
            heartbeat.clone(),
            ShutdownConfig::default(),
        ));

        let (handoff_tx, mut handoff_rx) = mpsc::channel::<Handoff>(1);
        let mut orchestrator = UpgradeOrchestrator::new(
            heartbeat.clone(),
            store.clone(),
            releases,
            registry.clone(),
            handoff_tx,
            OrchestratorConfig::from(&self.config),
        )
        .with_hooks(self.hooks.clone())
        .with_cancel(shutdown.token());

        if let Some(dir) = &self.config.game.installation {
            let installation = Arc::new(GameInstallation::new(dir, &self.config.game));
            let versions = Arc::new(HttpGameVersionSource::new(&self.config.game)?);
            orchestrator = orchestrator.with_game(
                installation.clone(),
                Arc::new(UpdaterProcess::new(installation)),
                versions,
            );
        }
        let orchestrator = Arc::new(orchestrator);

        orchestrator
            .startup(self.config.node.autoupdate && self.allow_update)
            .await;

        let token = shutdown.token();
        {
            let heartbeat = heartbeat.clone();
            let token = token.clone();
            shutdown
                .spawn("heartbeat", async move { heartbeat.run(token).await })
                .await;
        }
        {
            let relay = CommandRelay::new(
                store.clone(),
                guild,
                name.clone(),
                self.config.cluster.command_poll_interval(),
                action_tx,
            );
            let token = token.clone();
            shutdown
                .spawn("relay", async move { relay.run(token).await })
                .await;
        }
        {
            let orchestrator = orchestrator.clone();
            let token = token.clone();
            shutdown
                .spawn("upgrades", async move { orchestrator.run(action_rx, token).await })
                .await;
        }
        {
            let orchestrator = orchestrator.clone();
            let token = token.clone();
            shutdown
                .spawn("autoupdate", async move {
                    orchestrator.run_autoupdate(token).await
                })
                .await;
        }
        shutdown
            .spawn("roles", report_role_changes(heartbeat.clone(), token))
            .await;

        tracing::info!(node = %name, tasks = shutdown.task_count().await, "Node started");

        let handoff = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                None
            }
            handoff = handoff_rx.recv() => handoff,
        };

        shutdown.shutdown().await;
        db.close().await;

        if let Some(handoff) = handoff {
            ExecSupervisor.exec_replace(&handoff.program, &handoff.args)?;
        }

        tracing::info!("Node stopped");
        Ok(())
    }
}

async fn report_role_changes(heartbeat: Arc<HeartbeatEngine>, cancel: CancellationToken) {
    let mut roles = heartbeat.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = roles.changed() => {
                if changed.is_err() {
                    break;
                }
                let role = NodeRole::from_master(*roles.borrow_and_update());
                tracing::info!("I am the {} now", role.as_str().to_uppercase());
            }
        }
    }
}

/// Builder for a [`Warden`] node.
pub struct WardenBuilder {
    config: Option<WardenConfig>,
    allow_update: bool,
    migrations_dir: PathBuf,
    extra_migrations: Vec<Migration>,
    servers: Vec<(String, Arc<dyn GameServer>)>,
    hooks: Arc<UpdateHooks>,
}

impl WardenBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            allow_update: true,
            migrations_dir: PathBuf::from("migrations"),
            extra_migrations: Vec::new(),
            servers: Vec::new(),
            hooks: Arc::new(UpdateHooks::new()),
        }
    }

    pub fn config(mut self, config: WardenConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Suppress the startup self-upgrade even when auto-update is on.
    pub fn no_update(mut self, no_update: bool) -> Self {
        self.allow_update = !no_update;
        self
    }

    /// Directory of extra migrations run by the master after the built-in ones.
    pub fn migrations_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_dir = path.into();
        self
    }

    pub fn migration(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.extra_migrations.push(Migration::new(name, sql));
        self
    }

    /// Attach the server object that runs in `instance`.
    pub fn server(mut self, instance: impl Into<String>, server: Arc<dyn GameServer>) -> Self {
        self.servers.push((instance.into(), server));
        self
    }

    pub fn hooks(&self) -> Arc<UpdateHooks> {
        self.hooks.clone()
    }

    pub fn build(self) -> Result<Warden> {
        let config = self
            .config
            .ok_or_else(|| WardenError::Config("Configuration is required".to_string()))?;
        if config.database.url.is_empty() {
            return Err(WardenError::Config("database.url is required".to_string()));
        }

        Ok(Warden {
            config,
            allow_update: self.allow_update,
            migrations_dir: self.migrations_dir,
            extra_migrations: self.extra_migrations,
            servers: self.servers,
            hooks: self.hooks,
        })
    }
}

impl Default for WardenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_runtime::upgrade::HookStage;

    #[test]
    fn test_builder_requires_config() {
        assert!(WardenBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_requires_database_url() {
        let config = WardenConfig::for_guild(1, "");
        assert!(matches!(
            WardenBuilder::new().config(config).build(),
            Err(WardenError::Config(_))
        ));
    }

    #[test]
    fn test_builder_with_config() {
        let config = WardenConfig::for_guild(1, "postgres://localhost/warden");
        let warden = WardenBuilder::new()
            .config(config)
            .no_update(true)
            .migration("0100_extra", "SELECT 1")
            .build()
            .unwrap();

        assert!(!warden.allow_update);
        assert_eq!(warden.extra_migrations.len(), 1);
        assert_eq!(warden.config().node.guild_id, 1);
    }

    #[test]
    fn test_builder_hooks_carry_over() {
        let builder = WardenBuilder::new();
        builder
            .hooks()
            .register(HookStage::BeforeUpdate, "srs", || async {});

        let warden = builder
            .config(WardenConfig::for_guild(1, "postgres://localhost/warden"))
            .build()
            .unwrap();
        assert_eq!(warden.hooks().names(HookStage::BeforeUpdate), vec!["srs"]);
    }

    #[test]
    fn test_node_name_prefers_config() {
        let mut config = WardenConfig::for_guild(1, "postgres://localhost/warden");
        config.node.name = Some("node-a".into());
        assert_eq!(node_name(&config), "node-a");

        config.node.name = None;
        assert!(!node_name(&config).is_empty());
    }
}
