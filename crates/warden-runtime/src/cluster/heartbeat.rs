//! Heartbeat and master election.
//!
//! Every node runs the same tick on a fixed interval. A tick locks the guild's
//! node rows, decides who is master and refreshes this node's liveness, all in
//! one transaction. The row lock is the only mutual exclusion between nodes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::cluster::{
    ClusterRecord, ClusterState, FleetVersion, LockedNodes, NodeAction, NodeCommand, NodeIdentity,
    NodeRole,
};
use warden_core::config::ClusterConfig;

use super::store::{CoordinationError, CoordinationStore, CoordinationTx, StoreResult};
use crate::upgrade::{ReleaseSource, ReleaseStatus};

/// Shortest period any background loop runs with.
pub(crate) const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Heartbeat timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ticks.
    pub interval: Duration,
    /// A master not seen for longer than this is presumed dead.
    pub timeout: Duration,
    /// Nodes seen within this window receive upgrade instructions.
    pub active_window: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
            active_window: Duration::from_secs(60),
        }
    }
}

impl From<&ClusterConfig> for HeartbeatConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            timeout: config.heartbeat_timeout(),
            active_window: config.active_window(),
        }
    }
}

/// Whether a fleet upgrade flagged by this master is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpgradeProbe {
    Outstanding,
    Complete,
    Unknown,
}

/// What a single tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub state: ClusterState,
    pub master: bool,
    /// Nodes instructed to upgrade during this tick.
    pub fanned_out: Vec<String>,
    /// This node must run its own upgrade again.
    pub retrigger: bool,
}

impl TickOutcome {
    fn new(state: ClusterState, master: bool) -> Self {
        Self {
            state,
            master,
            fanned_out: Vec::new(),
            retrigger: false,
        }
    }
}

/// Election engine for one node.
///
/// Owns the node's master flag. Subscribers are notified only when the flag
/// flips, never on a tick that confirms the current role.
pub struct HeartbeatEngine {
    store: Arc<dyn CoordinationStore>,
    identity: NodeIdentity,
    config: HeartbeatConfig,
    releases: Option<Arc<dyn ReleaseSource>>,
    upgrades: Option<mpsc::Sender<NodeAction>>,
    role_tx: watch::Sender<bool>,
}

impl HeartbeatEngine {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: NodeIdentity,
        config: HeartbeatConfig,
    ) -> Self {
        let (role_tx, _) = watch::channel(false);
        Self {
            store,
            identity,
            config,
            releases: None,
            upgrades: None,
            role_tx,
        }
    }

    /// Source consulted when this node is master and a fleet upgrade is pending.
    pub fn with_release_source(mut self, releases: Arc<dyn ReleaseSource>) -> Self {
        self.releases = Some(releases);
        self
    }

    /// Channel receiving this node's own upgrade requests.
    pub fn with_upgrade_sender(mut self, upgrades: mpsc::Sender<NodeAction>) -> Self {
        self.upgrades = Some(upgrades);
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn is_master(&self) -> bool {
        *self.role_tx.borrow()
    }

    pub fn role(&self) -> NodeRole {
        NodeRole::from_master(self.is_master())
    }

    /// Receiver that observes every master/agent transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.role_tx.subscribe()
    }

    /// Record this node's liveness at startup.
    pub async fn register(&self) -> StoreResult<()> {
        self.store
            .upsert_node_liveness(self.identity.guild, &self.identity.name)
            .await
    }

    /// Remove this node's liveness row at orderly shutdown.
    pub async fn unregister(&self) -> StoreResult<()> {
        self.store
            .delete_node(self.identity.guild, &self.identity.name)
            .await
    }

    /// Run one heartbeat and publish the resulting role.
    ///
    /// Never fails: on any store error the previous role is kept.
    pub async fn tick(&self) -> bool {
        let previous = self.is_master();

        let is_master = match self.evaluate().await {
            Ok(outcome) => {
                debug!(
                    guild = %self.identity.guild,
                    state = %outcome.state,
                    master = outcome.master,
                    "Heartbeat"
                );
                if outcome.retrigger {
                    self.request_upgrade();
                }
                outcome.master
            }
            Err(CoordinationError::SchemaMissing(msg)) => {
                info!(detail = %msg, "Coordination schema missing, assuming master role");
                true
            }
            Err(e) if e.is_unavailable() => {
                warn!(error = %e, role = %NodeRole::from_master(previous), "Database not available, keeping role");
                previous
            }
            Err(e) => {
                warn!(error = %e, role = %NodeRole::from_master(previous), "Heartbeat failed, keeping role");
                previous
            }
        };

        self.publish(is_master);
        is_master
    }

    /// Run one heartbeat transaction without publishing.
    pub async fn evaluate(&self) -> StoreResult<TickOutcome> {
        // The release check may hit the network, so it runs before any lock is taken.
        let probe = self.probe_pending_upgrade().await?;

        let mut tx = self.store.begin(self.identity.guild).await?;
        let decided = match self.decide(tx.as_mut(), probe).await {
            Ok(outcome) => tx.touch_node(&self.identity.name).await.map(|()| outcome),
            Err(e) => Err(e),
        };
        let result = match decided {
            Ok(outcome) => tx.commit().await.map(|()| outcome),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        };

        // Liveness is refreshed even when the election transaction is lost.
        if result.is_err() {
            if let Err(touch) = self
                .store
                .upsert_node_liveness(self.identity.guild, &self.identity.name)
                .await
            {
                debug!(error = %touch, "Liveness update failed");
            }
        }
        result
    }

    /// Tick until cancelled. Cancellation is only observed between ticks.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.interval.max(MIN_PERIOD);
        let start = Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick().await;
        }

        info!("Heartbeat loop stopped");
    }

    async fn probe_pending_upgrade(&self) -> StoreResult<UpgradeProbe> {
        let cluster = self.store.read_cluster(self.identity.guild).await?;
        let pending =
            matches!(&cluster, Some(c) if c.master == self.identity.name && c.update_pending);
        if !pending {
            return Ok(UpgradeProbe::Unknown);
        }

        let Some(releases) = &self.releases else {
            return Ok(UpgradeProbe::Unknown);
        };

        Ok(match releases.check(&self.identity.version).await {
            Ok(ReleaseStatus::Available(latest)) => {
                debug!(latest = %latest, "Fleet upgrade still outstanding");
                UpgradeProbe::Outstanding
            }
            Ok(ReleaseStatus::UpToDate) => UpgradeProbe::Complete,
            Err(e) => {
                warn!(error = %e, "Update check failed, leaving the update flag untouched");
                UpgradeProbe::Unknown
            }
        })
    }

    async fn decide(
        &self,
        tx: &mut dyn CoordinationTx,
        probe: UpgradeProbe,
    ) -> StoreResult<TickOutcome> {
        let me = &self.identity;
        let mut nodes = tx.lock_nodes().await?;

        let cluster = match tx.read_cluster().await? {
            Some(cluster) => cluster,
            None => {
                if tx.create_cluster(&me.name, &me.version.to_string()).await? {
                    info!(guild = %me.guild, version = %me.version, "Cluster created");
                    return Ok(TickOutcome::new(ClusterState::NoCluster, true));
                }
                // Lost the creation race: the winner's rows are visible now.
                nodes = tx.lock_nodes().await?;
                let cluster = tx.read_cluster().await?.ok_or_else(|| {
                    CoordinationError::Query("cluster row missing after conflict".into())
                })?;
                debug!(master = %cluster.master, "Cluster was created concurrently");
                cluster
            }
        };

        if cluster.master == me.name {
            return self.decide_as_master(tx, &cluster, &nodes, probe).await;
        }

        if cluster.update_pending {
            debug!(master = %cluster.master, "Fleet upgrade pending, not taking over");
            return Ok(TickOutcome::new(ClusterState::OtherIsMasterAlive, false));
        }

        let mut ahead = false;
        match FleetVersion::parse(&cluster.version) {
            Ok(fleet) if me.version < fleet => {
                info!(running = %me.version, fleet = %fleet, "Node is behind the fleet, upgrading");
                tx.enqueue_command(&me.name, &NodeCommand::upgrade()).await?;
                return Ok(TickOutcome::new(ClusterState::VersionMismatchBehind, false));
            }
            Ok(fleet) if me.version > fleet => {
                warn!(
                    running = %me.version,
                    fleet = %fleet,
                    "Node is newer than the fleet, please upgrade master {}",
                    cluster.master
                );
                ahead = true;
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Fleet version not comparable"),
        }

        let master_row = nodes.find(&cluster.master);
        let master_alive = master_row
            .map(|row| !row.is_expired(nodes.now, self.config.timeout))
            .unwrap_or(false);
        let state = if ahead {
            ClusterState::VersionMismatchAhead
        } else if master_alive {
            ClusterState::OtherIsMasterAlive
        } else {
            ClusterState::OtherIsMasterPresumedDead
        };

        if me.preferred_master {
            info!(previous = %cluster.master, "Taking over as preferred master");
            tx.set_master(&me.name).await?;
            return Ok(TickOutcome::new(state, true));
        }

        if master_alive {
            return Ok(TickOutcome::new(state, false));
        }

        match master_row {
            Some(row) => warn!(
                master = %cluster.master,
                last_seen_secs = row.age(nodes.now).num_seconds(),
                "Master not responding, taking over"
            ),
            None => warn!(master = %cluster.master, "Master not registered, taking over"),
        }
        tx.set_master(&me.name).await?;
        Ok(TickOutcome::new(state, true))
    }

    async fn decide_as_master(
        &self,
        tx: &mut dyn CoordinationTx,
        cluster: &ClusterRecord,
        nodes: &LockedNodes,
        probe: UpgradeProbe,
    ) -> StoreResult<TickOutcome> {
        let me = &self.identity;
        let mut outcome = TickOutcome::new(ClusterState::SelfIsMaster, true);

        if cluster.update_pending {
            match probe {
                UpgradeProbe::Complete => {
                    tx.set_update_pending(false).await?;
                    tx.set_version(&me.version.to_string()).await?;
                    let targets = nodes.active_except(&me.name, self.config.active_window);
                    for node in &targets {
                        tx.enqueue_command(node, &NodeCommand::upgrade()).await?;
                    }
                    info!(version = %me.version, nodes = ?targets, "Master upgraded, upgrading agents");
                    outcome.fanned_out = targets;
                }
                UpgradeProbe::Outstanding => outcome.retrigger = true,
                UpgradeProbe::Unknown => debug!("Upgrade state unknown, keeping the update flag"),
            }
            return Ok(outcome);
        }

        match FleetVersion::parse(&cluster.version) {
            Ok(fleet) if fleet == me.version => {}
            Ok(fleet) => {
                if fleet > me.version {
                    warn!(
                        running = %me.version,
                        fleet = %fleet,
                        "Master is older than the fleet version, downgrading fleet version"
                    );
                } else {
                    info!(running = %me.version, fleet = %fleet, "Updating fleet version");
                }
                tx.set_version(&me.version.to_string()).await?;
            }
            Err(e) => {
                warn!(error = %e, stored = %cluster.version, "Invalid fleet version, correcting");
                tx.set_version(&me.version.to_string()).await?;
            }
        }

        Ok(outcome)
    }

    fn request_upgrade(&self) {
        let Some(upgrades) = &self.upgrades else {
            debug!("No upgrade handler attached");
            return;
        };
        match upgrades.try_send(NodeAction::Upgrade) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => debug!("Upgrade already queued"),
            Err(mpsc::error::TrySendError::Closed(_)) => warn!("Upgrade handler has stopped"),
        }
    }

    fn publish(&self, is_master: bool) {
        let changed = self.role_tx.send_if_modified(|current| {
            if *current == is_master {
                return false;
            }
            *current = is_master;
            true
        });
        if changed {
            info!(
                guild = %self.identity.guild,
                node = %self.identity.name,
                role = %NodeRole::from_master(is_master),
                "Role changed"
            );
        }
    }
}
