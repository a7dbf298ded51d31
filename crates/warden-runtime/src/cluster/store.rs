use async_trait::async_trait;
use warden_core::cluster::{ClusterRecord, GuildId, LockedNodes, NodeCommand};
use warden_core::WardenError;

/// Postgres `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// Failure of a coordination store operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinationError {
    /// The store could not be reached.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),
    /// The coordination tables do not exist yet.
    #[error("coordination schema missing: {0}")]
    SchemaMissing(String),
    /// Any other query failure.
    #[error("coordination query failed: {0}")]
    Query(String),
}

impl CoordinationError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for CoordinationError {
    fn from(e: sqlx::Error) -> Self {
        if crate::db::is_connectivity_error(&e) {
            return Self::Unavailable(e.to_string());
        }
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some(UNDEFINED_TABLE) {
                return Self::SchemaMissing(db.message().to_string());
            }
        }
        Self::Query(e.to_string())
    }
}

impl From<CoordinationError> for WardenError {
    fn from(e: CoordinationError) -> Self {
        WardenError::Cluster(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, CoordinationError>;

/// Shared coordination substrate.
///
/// Every election decision happens inside a [`CoordinationTx`] that holds the
/// guild's node rows locked until commit or rollback. The remaining methods are
/// single statements outside any election transaction.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Open a transaction scoped to one guild.
    async fn begin(&self, guild: GuildId) -> StoreResult<Box<dyn CoordinationTx>>;

    /// Insert or refresh a node's last-seen timestamp.
    async fn upsert_node_liveness(&self, guild: GuildId, node: &str) -> StoreResult<()>;

    async fn delete_node(&self, guild: GuildId, node: &str) -> StoreResult<()>;

    async fn read_cluster(&self, guild: GuildId) -> StoreResult<Option<ClusterRecord>>;

    async fn set_update_pending(&self, guild: GuildId, pending: bool) -> StoreResult<()>;

    async fn enqueue_command(
        &self,
        guild: GuildId,
        node: &str,
        command: &NodeCommand,
    ) -> StoreResult<()>;

    /// Remove and return the pending relay payloads for a node, oldest first.
    async fn take_commands(&self, guild: GuildId, node: &str)
        -> StoreResult<Vec<serde_json::Value>>;
}

/// A guild-scoped transaction with the guild's node rows locked.
#[async_trait]
pub trait CoordinationTx: Send {
    /// Lock and return all node rows of the guild, with the store's clock.
    async fn lock_nodes(&mut self) -> StoreResult<LockedNodes>;

    async fn read_cluster(&mut self) -> StoreResult<Option<ClusterRecord>>;

    /// Insert the cluster row. Returns `false` if another node created it first.
    async fn create_cluster(&mut self, master: &str, version: &str) -> StoreResult<bool>;

    async fn set_master(&mut self, master: &str) -> StoreResult<()>;

    async fn set_version(&mut self, version: &str) -> StoreResult<()>;

    async fn set_update_pending(&mut self, pending: bool) -> StoreResult<()>;

    async fn enqueue_command(&mut self, node: &str, command: &NodeCommand) -> StoreResult<()>;

    /// Insert or refresh a node's last-seen timestamp within the transaction.
    async fn touch_node(&mut self, node: &str) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Store rows mirroring the locally owned instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn upsert_instance(
        &self,
        node: &str,
        instance: &str,
        port: u16,
        server_name: Option<&str>,
    ) -> StoreResult<()>;

    async fn delete_instance(&self, node: &str, instance: &str) -> StoreResult<()>;

    async fn rename_instance(&self, node: &str, old_name: &str, new_name: &str)
        -> StoreResult<()>;

    /// Re-link an instance row to another server, or unlink it with `None`.
    async fn link_server(
        &self,
        node: &str,
        instance: &str,
        server_name: Option<&str>,
    ) -> StoreResult<()>;
}
