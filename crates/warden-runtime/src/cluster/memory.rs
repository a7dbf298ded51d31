//! In-memory coordination store.
//!
//! Each guild's state sits behind its own async mutex, and a transaction owns
//! that mutex until it commits or rolls back. This gives the same mutual
//! exclusion a `SELECT ... FOR UPDATE` over the guild's node rows gives in
//! Postgres. Writes are staged on a copy and only become visible on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use warden_core::cluster::{ClusterRecord, GuildId, LockedNodes, NodeCommand, NodeRecord};

use super::store::{CoordinationError, CoordinationStore, CoordinationTx, InstanceStore, StoreResult};

#[derive(Debug, Clone, Default)]
struct GuildState {
    nodes: BTreeMap<String, DateTime<Utc>>,
    cluster: Option<ClusterRecord>,
    intercom: Vec<(u64, String, serde_json::Value)>,
    next_command_id: u64,
}

impl GuildState {
    fn push_command(&mut self, node: &str, command: &NodeCommand) {
        self.next_command_id += 1;
        self.intercom
            .push((self.next_command_id, node.to_string(), command.to_json()));
    }

    fn cluster_mut(&mut self) -> StoreResult<&mut ClusterRecord> {
        self.cluster
            .as_mut()
            .ok_or_else(|| CoordinationError::Query("cluster row does not exist".into()))
    }
}

/// Row mirrored from an instance descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRow {
    pub port: u16,
    pub server_name: Option<String>,
}

/// Coordination store kept entirely in process memory.
#[derive(Default)]
pub struct MemoryCoordinationStore {
    guilds: Mutex<HashMap<GuildId, Arc<Mutex<GuildState>>>>,
    instances: Mutex<BTreeMap<(String, String), InstanceRow>>,
    unavailable: AtomicBool,
    fail_writes: Arc<AtomicBool>,
    fail_commits: Arc<AtomicBool>,
    concurrent_creator: Arc<Mutex<Option<String>>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make transactional election writes fail with a query error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make transaction commits fail, discarding the staged writes.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Have the next cluster creation lose to `node`, as if that node's
    /// transaction had committed the cluster row first.
    pub async fn set_concurrent_creator(&self, node: &str) {
        *self.concurrent_creator.lock().await = Some(node.to_string());
    }

    /// Overwrite a node's last-seen timestamp.
    pub async fn set_last_seen(&self, guild: GuildId, node: &str, last_seen: DateTime<Utc>) {
        let state = self.guild(guild).await;
        state.lock().await.nodes.insert(node.to_string(), last_seen);
    }

    pub async fn node_names(&self, guild: GuildId) -> Vec<String> {
        let state = self.guild(guild).await;
        let names = state.lock().await.nodes.keys().cloned().collect();
        names
    }

    pub async fn last_seen(&self, guild: GuildId, node: &str) -> Option<DateTime<Utc>> {
        let state = self.guild(guild).await;
        let seen = state.lock().await.nodes.get(node).copied();
        seen
    }

    /// Overwrite the cluster row.
    pub async fn put_cluster(&self, record: ClusterRecord) {
        let state = self.guild(record.guild).await;
        state.lock().await.cluster = Some(record);
    }

    /// Pending relay payloads without consuming them.
    pub async fn pending_commands(&self, guild: GuildId) -> Vec<(String, serde_json::Value)> {
        let state = self.guild(guild).await;
        let pending = state
            .lock()
            .await
            .intercom
            .iter()
            .map(|(_, node, data)| (node.clone(), data.clone()))
            .collect();
        pending
    }

    pub async fn instance_row(&self, node: &str, instance: &str) -> Option<InstanceRow> {
        self.instances
            .lock()
            .await
            .get(&(node.to_string(), instance.to_string()))
            .cloned()
    }

    async fn guild(&self, guild: GuildId) -> Arc<Mutex<GuildState>> {
        self.guilds.lock().await.entry(guild).or_default().clone()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn begin(&self, guild: GuildId) -> StoreResult<Box<dyn CoordinationTx>> {
        self.check_available()?;
        let guard = self.guild(guild).await.lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guild,
            guard,
            staged,
            fail_writes: self.fail_writes.clone(),
            fail_commits: self.fail_commits.clone(),
            concurrent_creator: self.concurrent_creator.clone(),
        }))
    }

    async fn upsert_node_liveness(&self, guild: GuildId, node: &str) -> StoreResult<()> {
        self.check_available()?;
        let state = self.guild(guild).await;
        state.lock().await.nodes.insert(node.to_string(), Utc::now());
        Ok(())
    }

    async fn delete_node(&self, guild: GuildId, node: &str) -> StoreResult<()> {
        self.check_available()?;
        let state = self.guild(guild).await;
        state.lock().await.nodes.remove(node);
        Ok(())
    }

    async fn read_cluster(&self, guild: GuildId) -> StoreResult<Option<ClusterRecord>> {
        self.check_available()?;
        let state = self.guild(guild).await;
        let cluster = state.lock().await.cluster.clone();
        Ok(cluster)
    }

    async fn set_update_pending(&self, guild: GuildId, pending: bool) -> StoreResult<()> {
        self.check_available()?;
        let state = self.guild(guild).await;
        let mut state = state.lock().await;
        if let Some(cluster) = state.cluster.as_mut() {
            cluster.update_pending = pending;
        }
        Ok(())
    }

    async fn enqueue_command(
        &self,
        guild: GuildId,
        node: &str,
        command: &NodeCommand,
    ) -> StoreResult<()> {
        self.check_available()?;
        let state = self.guild(guild).await;
        state.lock().await.push_command(node, command);
        Ok(())
    }

    async fn take_commands(
        &self,
        guild: GuildId,
        node: &str,
    ) -> StoreResult<Vec<serde_json::Value>> {
        self.check_available()?;
        let state = self.guild(guild).await;
        let mut state = state.lock().await;
        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.intercom)
            .into_iter()
            .partition(|(_, target, _)| target == node);
        state.intercom = rest;
        Ok(mine.into_iter().map(|(_, _, data)| data).collect())
    }
}

#[async_trait]
impl InstanceStore for MemoryCoordinationStore {
    async fn upsert_instance(
        &self,
        node: &str,
        instance: &str,
        port: u16,
        server_name: Option<&str>,
    ) -> StoreResult<()> {
        self.check_available()?;
        self.instances.lock().await.insert(
            (node.to_string(), instance.to_string()),
            InstanceRow {
                port,
                server_name: server_name.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn delete_instance(&self, node: &str, instance: &str) -> StoreResult<()> {
        self.check_available()?;
        self.instances
            .lock()
            .await
            .remove(&(node.to_string(), instance.to_string()));
        Ok(())
    }

    async fn rename_instance(
        &self,
        node: &str,
        old_name: &str,
        new_name: &str,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut rows = self.instances.lock().await;
        if let Some(row) = rows.remove(&(node.to_string(), old_name.to_string())) {
            rows.insert((node.to_string(), new_name.to_string()), row);
        }
        Ok(())
    }

    async fn link_server(
        &self,
        node: &str,
        instance: &str,
        server_name: Option<&str>,
    ) -> StoreResult<()> {
        self.check_available()?;
        if let Some(row) = self
            .instances
            .lock()
            .await
            .get_mut(&(node.to_string(), instance.to_string()))
        {
            row.server_name = server_name.map(str::to_string);
        }
        Ok(())
    }
}

fn locked_view(guild: GuildId, state: &GuildState) -> LockedNodes {
    LockedNodes {
        now: Utc::now(),
        nodes: state
            .nodes
            .iter()
            .map(|(name, last_seen)| NodeRecord {
                guild,
                name: name.clone(),
                last_seen: *last_seen,
            })
            .collect(),
    }
}

struct MemoryTx {
    guild: GuildId,
    guard: OwnedMutexGuard<GuildState>,
    staged: GuildState,
    fail_writes: Arc<AtomicBool>,
    fail_commits: Arc<AtomicBool>,
    concurrent_creator: Arc<Mutex<Option<String>>>,
}

impl MemoryTx {
    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoordinationError::Query("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationTx for MemoryTx {
    async fn lock_nodes(&mut self) -> StoreResult<LockedNodes> {
        Ok(locked_view(self.guild, &self.staged))
    }

    async fn read_cluster(&mut self) -> StoreResult<Option<ClusterRecord>> {
        Ok(self.staged.cluster.clone())
    }

    async fn create_cluster(&mut self, master: &str, version: &str) -> StoreResult<bool> {
        self.check_write()?;
        if let Some(winner) = self.concurrent_creator.lock().await.take() {
            self.staged.nodes.insert(winner.clone(), Utc::now());
            self.staged.cluster = Some(ClusterRecord {
                guild: self.guild,
                master: winner,
                version: version.to_string(),
                update_pending: false,
            });
        }
        if self.staged.cluster.is_some() {
            return Ok(false);
        }
        self.staged.cluster = Some(ClusterRecord {
            guild: self.guild,
            master: master.to_string(),
            version: version.to_string(),
            update_pending: false,
        });
        Ok(true)
    }

    async fn set_master(&mut self, master: &str) -> StoreResult<()> {
        self.check_write()?;
        self.staged.cluster_mut()?.master = master.to_string();
        Ok(())
    }

    async fn set_version(&mut self, version: &str) -> StoreResult<()> {
        self.check_write()?;
        self.staged.cluster_mut()?.version = version.to_string();
        Ok(())
    }

    async fn set_update_pending(&mut self, pending: bool) -> StoreResult<()> {
        self.check_write()?;
        self.staged.cluster_mut()?.update_pending = pending;
        Ok(())
    }

    async fn enqueue_command(&mut self, node: &str, command: &NodeCommand) -> StoreResult<()> {
        self.check_write()?;
        self.staged.push_command(node, command);
        Ok(())
    }

    async fn touch_node(&mut self, node: &str) -> StoreResult<()> {
        self.staged.nodes.insert(node.to_string(), Utc::now());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(CoordinationError::Query("injected commit failure".into()));
        }
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
