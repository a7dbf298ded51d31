//! Upgrade orchestration.
//!
//! Two kinds of upgrade pass through here. The node software is upgraded by
//! handing the process over to the updater entry point (the master first
//! flags the fleet so leadership stays put meanwhile). The game software is
//! upgraded in place with a drain, update and resume cycle over the local
//! servers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::cluster::NodeAction;
use warden_core::instance::{Coalition, GameServer, ServerError};
use warden_core::WardenConfig;

use super::audit::{AuditSink, TracingAudit};
use super::desanitize::desanitize;
use super::hooks::{HookStage, UpdateHooks};
use super::release::{GameVersionSource, ReleaseSource, ReleaseStatus};
use super::supervisor::ExecSupervisor;
use super::updater::{GameInstallation, GameUpdater};
use super::UpgradeError;
use crate::cluster::{CoordinationStore, HeartbeatEngine, MIN_PERIOD};

/// Servers this node drains before touching the game installation.
pub trait ServerSet: Send + Sync {
    fn servers(&self) -> Vec<Arc<dyn GameServer>>;
}

/// Process image the node must be replaced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Node software lives on a drive shared with other nodes.
    pub cloud_drive: bool,
    /// Game installation is shared with other nodes.
    pub cloud: bool,
    /// Update the game software automatically.
    pub game_autoupdate: bool,
    pub check_interval: Duration,
    /// Countdown marks in seconds before a server goes down.
    pub warn_times: Vec<u64>,
    pub desanitize: bool,
    /// Replacement mission scripting file, if the operator provides one.
    pub custom_scripting: Option<PathBuf>,
    /// Updater entry point for node self-upgrade.
    pub update_entrypoint: PathBuf,
    pub update_args: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cloud_drive: true,
            cloud: false,
            game_autoupdate: false,
            check_interval: Duration::from_secs(300),
            warn_times: vec![300, 120, 60],
            desanitize: true,
            custom_scripting: None,
            update_entrypoint: PathBuf::from("warden-update"),
            update_args: Vec::new(),
        }
    }
}

impl From<&WardenConfig> for OrchestratorConfig {
    fn from(config: &WardenConfig) -> Self {
        Self {
            cloud_drive: config.node.cloud_drive,
            cloud: config.game.cloud,
            game_autoupdate: config.game.autoupdate,
            check_interval: config.game.check_interval(),
            warn_times: config.game.warn_times.clone(),
            desanitize: config.game.desanitize,
            custom_scripting: Some(
                config
                    .node
                    .install_dir
                    .join("config")
                    .join("MissionScripting.lua"),
            ),
            update_entrypoint: config.update.entrypoint.clone(),
            update_args: config.update.args.clone(),
        }
    }
}

struct GameParts {
    installation: Arc<GameInstallation>,
    updater: Arc<dyn GameUpdater>,
    versions: Arc<dyn GameVersionSource>,
}

/// Drives node self-upgrades and game update cycles.
pub struct UpgradeOrchestrator {
    heartbeat: Arc<HeartbeatEngine>,
    store: Arc<dyn CoordinationStore>,
    releases: Arc<dyn ReleaseSource>,
    servers: Arc<dyn ServerSet>,
    handoff: mpsc::Sender<Handoff>,
    config: OrchestratorConfig,
    hooks: Arc<UpdateHooks>,
    audit: Arc<dyn AuditSink>,
    game: Option<GameParts>,
    update_in_progress: AtomicBool,
    cancel: CancellationToken,
}

impl UpgradeOrchestrator {
    pub fn new(
        heartbeat: Arc<HeartbeatEngine>,
        store: Arc<dyn CoordinationStore>,
        releases: Arc<dyn ReleaseSource>,
        servers: Arc<dyn ServerSet>,
        handoff: mpsc::Sender<Handoff>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            heartbeat,
            store,
            releases,
            servers,
            handoff,
            config,
            hooks: Arc::new(UpdateHooks::new()),
            audit: Arc::new(TracingAudit),
            game: None,
            update_in_progress: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Manage the game installation at `installation`.
    pub fn with_game(
        mut self,
        installation: Arc<GameInstallation>,
        updater: Arc<dyn GameUpdater>,
        versions: Arc<dyn GameVersionSource>,
    ) -> Self {
        self.game = Some(GameParts {
            installation,
            updater,
            versions,
        });
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<UpdateHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Token that aborts a running countdown.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn hooks(&self) -> &Arc<UpdateHooks> {
        &self.hooks
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::SeqCst)
    }

    /// Whether newer node software is available. Failures count as "no".
    pub async fn upgrade_pending(&self) -> bool {
        match self.releases.check(&self.heartbeat.identity().version).await {
            Ok(ReleaseStatus::Available(latest)) => {
                info!(latest = %latest, "Update available");
                true
            }
            Ok(ReleaseStatus::UpToDate) => {
                debug!("No update found");
                false
            }
            Err(e) => {
                warn!(error = %e, "Update check failed");
                false
            }
        }
    }

    /// Upgrade the node software if a newer release exists.
    ///
    /// A non-master on a shared drive only restarts: the master has already
    /// replaced the files underneath it. Returns whether the process is
    /// being handed off.
    pub async fn upgrade(&self) -> Result<bool, UpgradeError> {
        let is_master = self.heartbeat.is_master();

        if !is_master && self.config.cloud_drive {
            self.restart().await?;
            return Ok(true);
        }

        if !self.upgrade_pending().await {
            return Ok(false);
        }

        if is_master {
            let guild = self.heartbeat.identity().guild;
            self.store
                .set_update_pending(guild, true)
                .await
                .map_err(|e| UpgradeError::Source(e.to_string()))?;
            info!(guild = %guild, "Fleet upgrade started");
        }

        let (_, mut args) = ExecSupervisor::current_invocation()?;
        let mut handoff_args = self.config.update_args.clone();
        handoff_args.append(&mut args);
        self.hand_off(Handoff {
            program: self.config.update_entrypoint.clone(),
            args: handoff_args,
        })
        .await?;
        Ok(true)
    }

    /// Replace the process with a fresh copy of itself.
    pub async fn restart(&self) -> Result<(), UpgradeError> {
        info!("Restarting...");
        let (program, args) = ExecSupervisor::current_invocation()?;
        self.hand_off(Handoff { program, args }).await
    }

    async fn hand_off(&self, handoff: Handoff) -> Result<(), UpgradeError> {
        self.handoff
            .send(handoff)
            .await
            .map_err(|_| UpgradeError::Supervisor("process owner has stopped".to_string()))
    }

    /// Drain the local servers, update the game software and resume.
    ///
    /// Returns the updater's exit code.
    pub async fn update(&self, warn_times: &[u64], branch: Option<&str>) -> i32 {
        let Some(game) = &self.game else {
            warn!("No game installation configured, nothing to update");
            return -1;
        };

        self.update_in_progress.store(true, Ordering::SeqCst);
        let servers: Vec<_> = self
            .servers
            .servers()
            .into_iter()
            .filter(|s| !s.is_remote())
            .collect();

        let mut in_maintenance = HashSet::new();
        let mut to_start = HashSet::new();
        let mut shutdowns = Vec::new();
        for server in &servers {
            if server.maintenance() {
                in_maintenance.insert(server.name());
            } else {
                server.set_maintenance(true);
            }
            if server.status().is_active() {
                to_start.insert(server.name());
                shutdowns.push(tokio::spawn(shutdown_with_warning(
                    server.clone(),
                    warn_times.to_vec(),
                    self.cancel.clone(),
                )));
            }
        }

        for result in futures_util::future::join_all(shutdowns).await {
            if let Err(e) = result {
                error!(error = %e, "Shutdown task failed");
            }
        }

        let rc = if self.cancel.is_cancelled() {
            warn!("Update cancelled");
            -1
        } else {
            self.apply_update(game, branch).await
        };

        for server in &servers {
            let name = server.name();
            if !in_maintenance.contains(&name) {
                server.set_maintenance(false);
            }
            if to_start.contains(&name) && !self.cancel.is_cancelled() {
                match server.startup().await {
                    Ok(()) => {}
                    Err(ServerError::Timeout(_)) => warn!(
                        server = %name,
                        "Timeout while starting server, please check it manually!"
                    ),
                    Err(e) => error!(server = %name, error = %e, "Failed to start server"),
                }
            }
        }

        self.update_in_progress.store(false, Ordering::SeqCst);
        rc
    }

    async fn apply_update(&self, game: &GameParts, branch: Option<&str>) -> i32 {
        info!(installation = %game.installation.root().display(), "Updating game software...");
        self.hooks.run(HookStage::BeforeUpdate).await;

        let rc = game.updater.update(branch).await;
        if rc != 0 {
            error!(rc, "Game update failed");
            return rc;
        }

        game.installation.clear_cache();
        if self.config.desanitize && (!self.config.cloud || self.heartbeat.is_master()) {
            let custom = self.config.custom_scripting.as_deref();
            if let Err(e) = desanitize(&game.installation.scripting_file(), custom) {
                error!(error = %e, "Can't desanitize mission scripting, check file permissions");
            }
        }
        self.hooks.run(HookStage::AfterUpdate).await;
        info!(installation = %game.installation.root().display(), "Game software updated to the latest version");
        rc
    }

    /// Check the game software once and run an update cycle if it is outdated.
    ///
    /// Returns whether a cycle ran.
    pub async fn check_game_update(&self) -> Result<bool, UpgradeError> {
        let Some(game) = &self.game else {
            return Ok(false);
        };
        if self.is_update_in_progress() {
            debug!("Update in progress, skipping version check");
            return Ok(false);
        }

        let (branch, installed) = game.installation.branch_and_version()?;
        let Some(latest) = game.versions.latest_version(&branch).await? else {
            return Ok(false);
        };
        if latest == installed {
            return Ok(false);
        }

        info!(installed = %installed, latest = %latest, branch = %branch, "A new game version is available, updating");
        let rc = self.update(&self.config.warn_times, None).await;
        if rc == 0 {
            self.audit
                .audit(&format!("Game software updated to version {}", latest))
                .await;
        } else {
            self.audit
                .alert(
                    "Game update failed",
                    &format!("Update to version {} failed with code {}", latest, rc),
                )
                .await;
        }
        Ok(true)
    }

    /// Game auto-update loop. Only runs where the installation is not shared
    /// or this node is master.
    pub async fn run_autoupdate(&self, cancel: CancellationToken) {
        if self.game.is_none() || !self.config.game_autoupdate {
            return;
        }

        let mut interval = tokio::time::interval(self.config.check_interval.max(MIN_PERIOD));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if self.config.cloud && !self.heartbeat.is_master() {
                continue;
            }
            if let Err(e) = self.check_game_update().await {
                warn!(error = %e, "Game version check failed, possible auth-server outage");
            }
        }
    }

    /// Startup policy for both kinds of upgrade.
    pub async fn startup(&self, autoupdate: bool) {
        let is_master = self.heartbeat.is_master();
        if autoupdate {
            if is_master || !self.config.cloud_drive {
                if let Err(e) = self.upgrade().await {
                    error!(error = %e, "Upgrade failed");
                }
            }
        } else if is_master && self.upgrade_pending().await {
            warn!("New update available, please run the updater");
        }

        if self.config.game_autoupdate {
            return;
        }
        let Some(game) = &self.game else {
            return;
        };
        match game.installation.branch_and_version() {
            Ok((branch, installed)) => match game.versions.latest_version(&branch).await {
                Ok(Some(latest)) if latest != installed => warn!(
                    installed = %installed,
                    latest = %latest,
                    "Your game version is outdated, consider upgrading"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Game version check failed, possible auth-server outage"),
            },
            Err(e) => warn!(error = %e, "Can't read installed game version"),
        }
    }

    /// Handle instructions from the heartbeat and the command relay.
    pub async fn run(&self, mut actions: mpsc::Receiver<NodeAction>, cancel: CancellationToken) {
        loop {
            let action = tokio::select! {
                _ = cancel.cancelled() => break,
                action = actions.recv() => match action {
                    Some(action) => action,
                    None => break,
                },
            };

            let result = match action {
                NodeAction::Upgrade => self.upgrade().await.map(|_| ()),
                NodeAction::Restart => self.restart().await,
            };
            if let Err(e) = result {
                error!(action = ?action, error = %e, "Instruction failed");
            }
        }
        debug!("Upgrade handler stopped");
    }
}

async fn shutdown_with_warning(
    server: Arc<dyn GameServer>,
    warn_times: Vec<u64>,
    cancel: CancellationToken,
) {
    if server.is_populated() {
        let mut remaining = warn_times.iter().copied().max().unwrap_or(0);
        while remaining > 0 {
            if warn_times.contains(&remaining) {
                let message = format!(
                    "Server is going down for a game update in {}!",
                    format_duration(remaining)
                );
                server.send_popup_message(Coalition::All, &message).await;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            remaining -= 1;
        }
    }

    if let Err(e) = server.shutdown().await {
        warn!(server = %server.name(), error = %e, "Shutdown failed");
    }
}

fn format_duration(seconds: u64) -> String {
    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    match (minutes, seconds) {
        (0, s) => plural(s, "second"),
        (m, 0) => plural(m, "minute"),
        (m, s) => format!("{} {}", plural(m, "minute"), plural(s, "second")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{HeartbeatConfig, MemoryCoordinationStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use warden_core::cluster::{ClusterRecord, FleetVersion, GuildId, NodeIdentity};
    use warden_core::config::GameConfig;
    use warden_core::instance::ServerStatus;

    const GUILD: GuildId = GuildId(5);

    struct FakeServer {
        name: String,
        remote: bool,
        populated: bool,
        startup_times_out: bool,
        status: Mutex<ServerStatus>,
        maintenance: AtomicBool,
        popups: Mutex<Vec<String>>,
        shutdowns: AtomicUsize,
        startups: AtomicUsize,
    }

    impl FakeServer {
        fn new(name: &str, status: ServerStatus) -> Self {
            Self {
                name: name.to_string(),
                remote: false,
                populated: false,
                startup_times_out: false,
                status: Mutex::new(status),
                maintenance: AtomicBool::new(false),
                popups: Mutex::new(Vec::new()),
                shutdowns: AtomicUsize::new(0),
                startups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GameServer for FakeServer {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn status(&self) -> ServerStatus {
            *self.status.lock().unwrap()
        }

        fn is_remote(&self) -> bool {
            self.remote
        }

        fn maintenance(&self) -> bool {
            self.maintenance.load(Ordering::SeqCst)
        }

        fn set_maintenance(&self, maintenance: bool) {
            self.maintenance.store(maintenance, Ordering::SeqCst);
        }

        fn is_populated(&self) -> bool {
            self.populated
        }

        async fn send_popup_message(&self, _coalition: Coalition, message: &str) {
            self.popups.lock().unwrap().push(message.to_string());
        }

        async fn shutdown(&self) -> Result<(), ServerError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            *self.status.lock().unwrap() = ServerStatus::Shutdown;
            Ok(())
        }

        async fn startup(&self) -> Result<(), ServerError> {
            self.startups.fetch_add(1, Ordering::SeqCst);
            if self.startup_times_out {
                return Err(ServerError::Timeout("starting".into()));
            }
            *self.status.lock().unwrap() = ServerStatus::Running;
            Ok(())
        }
    }

    struct Servers(Vec<Arc<FakeServer>>);

    impl ServerSet for Servers {
        fn servers(&self) -> Vec<Arc<dyn GameServer>> {
            self.0
                .iter()
                .map(|s| s.clone() as Arc<dyn GameServer>)
                .collect()
        }
    }

    struct FakeUpdater {
        rc: i32,
        calls: Mutex<Vec<Option<String>>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl GameUpdater for FakeUpdater {
        async fn update(&self, branch: Option<&str>) -> i32 {
            self.calls.lock().unwrap().push(branch.map(str::to_string));
            self.log.lock().unwrap().push("update".into());
            self.rc
        }
    }

    struct FixedRelease(ReleaseStatus);

    #[async_trait]
    impl ReleaseSource for FixedRelease {
        async fn check(&self, _running: &FleetVersion) -> Result<ReleaseStatus, UpgradeError> {
            Ok(self.0.clone())
        }
    }

    struct FixedGameVersion(&'static str);

    #[async_trait]
    impl GameVersionSource for FixedGameVersion {
        async fn latest_version(&self, _branch: &str) -> Result<Option<String>, UpgradeError> {
            Ok(Some(self.0.to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        audits: Mutex<Vec<String>>,
        alerts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuditSink for RecordingAudit {
        async fn audit(&self, message: &str) {
            self.audits.lock().unwrap().push(message.to_string());
        }

        async fn alert(&self, title: &str, _message: &str) {
            self.alerts.lock().unwrap().push(title.to_string());
        }
    }

    struct Harness {
        store: Arc<MemoryCoordinationStore>,
        orchestrator: UpgradeOrchestrator,
        handoff_rx: mpsc::Receiver<Handoff>,
        updater: Arc<FakeUpdater>,
        audit: Arc<RecordingAudit>,
        log: Arc<Mutex<Vec<String>>>,
        cancel: CancellationToken,
        dir: TempDir,
    }

    async fn harness(
        master: bool,
        config: OrchestratorConfig,
        release: ReleaseStatus,
        servers: Vec<Arc<FakeServer>>,
        rc: i32,
    ) -> Harness {
        let store = Arc::new(MemoryCoordinationStore::new());
        if !master {
            store
                .put_cluster(ClusterRecord {
                    guild: GUILD,
                    master: "other".into(),
                    version: "1.0.0".into(),
                    update_pending: false,
                })
                .await;
            store.upsert_node_liveness(GUILD, "other").await.unwrap();
        }
        let identity = NodeIdentity::new(GUILD, "self", FleetVersion::parse("1.0.0").unwrap());
        let heartbeat = Arc::new(HeartbeatEngine::new(
            store.clone(),
            identity,
            HeartbeatConfig::default(),
        ));
        assert_eq!(heartbeat.tick().await, master);

        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("autoupdate.cfg"),
            r#"{"branch": "release", "version": "2.9.1"}"#,
        )
        .unwrap();
        let installation = Arc::new(GameInstallation::new(dir.path(), &GameConfig::default()));

        let log = Arc::new(Mutex::new(Vec::new()));
        let updater = Arc::new(FakeUpdater {
            rc,
            calls: Mutex::new(Vec::new()),
            log: log.clone(),
        });
        let audit = Arc::new(RecordingAudit::default());
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let hooks = Arc::new(UpdateHooks::new());
        for (stage, name) in [
            (HookStage::BeforeUpdate, "before"),
            (HookStage::AfterUpdate, "after"),
        ] {
            let log = log.clone();
            hooks.register(stage, name, move || {
                let log = log.clone();
                async move { log.lock().unwrap().push(name.to_string()) }
            });
        }

        let orchestrator = UpgradeOrchestrator::new(
            heartbeat,
            store.clone(),
            Arc::new(FixedRelease(release)),
            Arc::new(Servers(servers)),
            handoff_tx,
            config,
        )
        .with_game(installation, updater.clone(), Arc::new(FixedGameVersion("2.9.2")))
        .with_hooks(hooks)
        .with_audit(audit.clone())
        .with_cancel(cancel.clone());

        Harness {
            store,
            orchestrator,
            handoff_rx,
            updater,
            audit,
            log,
            cancel,
            dir,
        }
    }

    fn no_desanitize() -> OrchestratorConfig {
        OrchestratorConfig {
            desanitize: false,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_cycle_drains_and_resumes() {
        let mut populated = FakeServer::new("populated", ServerStatus::Running);
        populated.populated = true;
        let populated = Arc::new(populated);

        let staged = Arc::new(FakeServer::new("staged", ServerStatus::Paused));
        staged.set_maintenance(true);

        let idle = Arc::new(FakeServer::new("idle", ServerStatus::Shutdown));

        let mut remote = FakeServer::new("remote", ServerStatus::Running);
        remote.remote = true;
        let remote = Arc::new(remote);

        let h = harness(
            true,
            no_desanitize(),
            ReleaseStatus::UpToDate,
            vec![populated.clone(), staged.clone(), idle.clone(), remote.clone()],
            0,
        )
        .await;

        let started = tokio::time::Instant::now();
        let rc = h.orchestrator.update(&[300, 120, 60], Some("openbeta")).await;
        assert_eq!(rc, 0);
        assert!(started.elapsed() >= Duration::from_secs(300));

        let popups = populated.popups.lock().unwrap().clone();
        assert_eq!(
            popups,
            vec![
                "Server is going down for a game update in 5 minutes!",
                "Server is going down for a game update in 2 minutes!",
                "Server is going down for a game update in 1 minute!",
            ]
        );
        assert!(staged.popups.lock().unwrap().is_empty());

        assert_eq!(populated.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(populated.startups.load(Ordering::SeqCst), 1);
        assert!(!populated.maintenance());

        // Maintenance set by the operator beforehand survives the cycle.
        assert_eq!(staged.startups.load(Ordering::SeqCst), 1);
        assert!(staged.maintenance());

        assert_eq!(idle.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(idle.startups.load(Ordering::SeqCst), 0);
        assert!(!idle.maintenance());

        assert_eq!(remote.shutdowns.load(Ordering::SeqCst), 0);
        assert!(!remote.maintenance());

        assert_eq!(*h.log.lock().unwrap(), vec!["before", "update", "after"]);
        assert_eq!(
            *h.updater.calls.lock().unwrap(),
            vec![Some("openbeta".to_string())]
        );
        assert!(!h.orchestrator.is_update_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_countdown_aborts_cycle() {
        let mut populated = FakeServer::new("populated", ServerStatus::Running);
        populated.populated = true;
        let populated = Arc::new(populated);
        let staged = Arc::new(FakeServer::new("staged", ServerStatus::Running));
        staged.set_maintenance(true);

        let h = harness(
            true,
            no_desanitize(),
            ReleaseStatus::UpToDate,
            vec![populated.clone(), staged.clone()],
            0,
        )
        .await;

        let (rc, ()) = tokio::join!(h.orchestrator.update(&[300, 120, 60], None), async {
            tokio::time::sleep(Duration::from_secs(90)).await;
            h.cancel.cancel();
        });
        assert_eq!(rc, -1);

        // Only the first mark was announced before the countdown stopped.
        assert_eq!(populated.popups.lock().unwrap().len(), 1);
        assert_eq!(populated.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(populated.startups.load(Ordering::SeqCst), 0);
        assert!(!populated.maintenance());
        assert!(staged.maintenance());

        assert!(h.updater.calls.lock().unwrap().is_empty());
        assert!(h.log.lock().unwrap().is_empty());
        assert!(!h.orchestrator.is_update_in_progress());
    }

    #[tokio::test]
    async fn test_failed_update_skips_after_hooks_and_restarts() {
        let server = Arc::new(FakeServer::new("alpha", ServerStatus::Running));
        let h = harness(true, no_desanitize(), ReleaseStatus::UpToDate, vec![server.clone()], 3).await;

        assert_eq!(h.orchestrator.update(&[], None).await, 3);
        assert_eq!(*h.log.lock().unwrap(), vec!["before", "update"]);
        assert_eq!(server.startups.load(Ordering::SeqCst), 1);
        assert!(!server.maintenance());
    }

    #[tokio::test]
    async fn test_restart_timeout_does_not_fail_cycle() {
        let mut slow = FakeServer::new("slow", ServerStatus::Running);
        slow.startup_times_out = true;
        let slow = Arc::new(slow);
        let fast = Arc::new(FakeServer::new("fast", ServerStatus::Running));

        let h = harness(
            true,
            no_desanitize(),
            ReleaseStatus::UpToDate,
            vec![slow.clone(), fast.clone()],
            0,
        )
        .await;

        assert_eq!(h.orchestrator.update(&[], None).await, 0);
        assert_eq!(slow.startups.load(Ordering::SeqCst), 1);
        assert_eq!(fast.startups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_successful_update_desanitizes() {
        let h = harness(
            true,
            OrchestratorConfig::default(),
            ReleaseStatus::UpToDate,
            Vec::new(),
            0,
        )
        .await;
        let scripting = h.dir.path().join("Scripts").join("MissionScripting.lua");
        std::fs::create_dir_all(scripting.parent().unwrap()).unwrap();
        std::fs::write(&scripting, "\tsanitizeModule('io')\n").unwrap();

        assert_eq!(h.orchestrator.update(&[], None).await, 0);
        assert_eq!(
            std::fs::read_to_string(&scripting).unwrap(),
            "\t--sanitizeModule('io')\n"
        );
    }

    #[tokio::test]
    async fn test_agent_on_cloud_drive_only_restarts() {
        let mut h = harness(
            false,
            OrchestratorConfig::default(),
            ReleaseStatus::Available("2.0.0".into()),
            Vec::new(),
            0,
        )
        .await;

        assert!(h.orchestrator.upgrade().await.unwrap());
        let handoff = h.handoff_rx.try_recv().unwrap();
        assert_eq!(handoff.program, std::env::current_exe().unwrap());
        assert!(!h.store.read_cluster(GUILD).await.unwrap().unwrap().update_pending);
    }

    #[tokio::test]
    async fn test_master_flags_fleet_and_hands_off() {
        let config = OrchestratorConfig {
            update_entrypoint: PathBuf::from("/opt/warden/warden-update"),
            update_args: vec!["--node".into(), "self".into()],
            ..Default::default()
        };
        let mut h = harness(true, config, ReleaseStatus::Available("2.0.0".into()), Vec::new(), 0).await;

        assert!(h.orchestrator.upgrade().await.unwrap());

        let cluster = h.store.read_cluster(GUILD).await.unwrap().unwrap();
        assert!(cluster.update_pending);

        let handoff = h.handoff_rx.try_recv().unwrap();
        assert_eq!(handoff.program, PathBuf::from("/opt/warden/warden-update"));
        assert_eq!(&handoff.args[..2], &["--node".to_string(), "self".to_string()]);
    }

    #[tokio::test]
    async fn test_no_release_means_no_upgrade() {
        let mut h = harness(true, no_desanitize(), ReleaseStatus::UpToDate, Vec::new(), 0).await;

        assert!(!h.orchestrator.upgrade().await.unwrap());
        assert!(h.handoff_rx.try_recv().is_err());
        assert!(!h.store.read_cluster(GUILD).await.unwrap().unwrap().update_pending);
    }

    #[tokio::test]
    async fn test_game_update_check_audits() {
        let h = harness(true, no_desanitize(), ReleaseStatus::UpToDate, Vec::new(), 0).await;

        assert!(h.orchestrator.check_game_update().await.unwrap());
        assert_eq!(*h.updater.calls.lock().unwrap(), vec![None]);
        assert_eq!(h.audit.audits.lock().unwrap().len(), 1);
        assert!(h.audit.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_game_update_failure_alerts() {
        let h = harness(true, no_desanitize(), ReleaseStatus::UpToDate, Vec::new(), 1).await;

        assert!(h.orchestrator.check_game_update().await.unwrap());
        assert_eq!(
            *h.audit.alerts.lock().unwrap(),
            vec!["Game update failed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_relayed_restart_hands_off() {
        let mut h = harness(true, no_desanitize(), ReleaseStatus::UpToDate, Vec::new(), 0).await;
        let orchestrator = Arc::new(h.orchestrator);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            async move { orchestrator.run(rx, cancel).await }
        });

        tx.send(NodeAction::Restart).await.unwrap();
        let handoff = h.handoff_rx.recv().await.unwrap();
        assert_eq!(handoff.program, std::env::current_exe().unwrap());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_upgrades_master() {
        let mut h = harness(
            true,
            OrchestratorConfig::default(),
            ReleaseStatus::Available("2.0.0".into()),
            Vec::new(),
            0,
        )
        .await;

        h.orchestrator.startup(true).await;

        assert!(h.store.read_cluster(GUILD).await.unwrap().unwrap().update_pending);
        let handoff = h.handoff_rx.try_recv().unwrap();
        assert_eq!(handoff.program, PathBuf::from("warden-update"));
    }

    #[tokio::test]
    async fn test_startup_upgrades_agent_on_local_drive() {
        let config = OrchestratorConfig {
            cloud_drive: false,
            ..Default::default()
        };
        let mut h = harness(false, config, ReleaseStatus::Available("2.0.0".into()), Vec::new(), 0).await;

        h.orchestrator.startup(true).await;

        let handoff = h.handoff_rx.try_recv().unwrap();
        assert_eq!(handoff.program, PathBuf::from("warden-update"));
        assert!(!h.store.read_cluster(GUILD).await.unwrap().unwrap().update_pending);
    }

    #[tokio::test]
    async fn test_startup_leaves_cloud_agent_alone() {
        let mut h = harness(
            false,
            OrchestratorConfig::default(),
            ReleaseStatus::Available("2.0.0".into()),
            Vec::new(),
            0,
        )
        .await;

        h.orchestrator.startup(true).await;
        assert!(h.handoff_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_startup_without_autoupdate_only_warns() {
        let mut h = harness(
            true,
            OrchestratorConfig::default(),
            ReleaseStatus::Available("2.0.0".into()),
            Vec::new(),
            0,
        )
        .await;

        h.orchestrator.startup(false).await;

        assert!(h.handoff_rx.try_recv().is_err());
        assert!(!h.store.read_cluster(GUILD).await.unwrap().unwrap().update_pending);
        assert!(h.updater.calls.lock().unwrap().is_empty());
    }

    fn shared_autoupdate() -> OrchestratorConfig {
        OrchestratorConfig {
            cloud: true,
            game_autoupdate: true,
            desanitize: false,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoupdate_skipped_on_shared_agent() {
        let h = harness(false, shared_autoupdate(), ReleaseStatus::UpToDate, Vec::new(), 0).await;
        let cancel = CancellationToken::new();

        tokio::join!(h.orchestrator.run_autoupdate(cancel.clone()), async {
            tokio::time::sleep(Duration::from_secs(301)).await;
            cancel.cancel();
        });

        assert!(h.updater.calls.lock().unwrap().is_empty());
        assert!(h.audit.audits.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoupdate_runs_on_shared_master() {
        let h = harness(true, shared_autoupdate(), ReleaseStatus::UpToDate, Vec::new(), 0).await;
        let cancel = CancellationToken::new();

        tokio::join!(h.orchestrator.run_autoupdate(cancel.clone()), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        assert_eq!(*h.updater.calls.lock().unwrap(), vec![None]);
        assert_eq!(h.audit.audits.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(300), "5 minutes");
        assert_eq!(format_duration(60), "1 minute");
        assert_eq!(format_duration(45), "45 seconds");
        assert_eq!(format_duration(90), "1 minute 30 seconds");
    }
}
