use chrono::{DateTime, Utc};

use super::version::FleetVersion;

/// Guild (deployment) identifier; coordination state is partitioned by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildId(pub i64);

impl GuildId {
    /// Get the inner value for database binding.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for GuildId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for GuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who this process is within the fleet.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Guild the node belongs to.
    pub guild: GuildId,
    /// Node name, unique within the guild.
    pub name: String,
    /// Version of the software this process is running.
    pub version: FleetVersion,
    /// Take over mastership unconditionally.
    pub preferred_master: bool,
}

impl NodeIdentity {
    pub fn new(guild: GuildId, name: impl Into<String>, version: FleetVersion) -> Self {
        Self {
            guild,
            name: name.into(),
            version,
            preferred_master: false,
        }
    }

    pub fn preferred(mut self, preferred: bool) -> Self {
        self.preferred_master = preferred;
        self
    }
}

/// Liveness row of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub guild: GuildId,
    pub name: String,
    /// Server clock, UTC.
    pub last_seen: DateTime<Utc>,
}

impl NodeRecord {
    /// Age of the last heartbeat relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_seen
    }

    /// Whether the last heartbeat is older than `threshold`.
    pub fn is_expired(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => self.age(now) > threshold,
            Err(_) => false,
        }
    }
}

/// Node rows of a guild, locked for the enclosing transaction, with the
/// store's clock at lock time.
#[derive(Debug, Clone)]
pub struct LockedNodes {
    pub now: DateTime<Utc>,
    pub nodes: Vec<NodeRecord>,
}

impl LockedNodes {
    /// Find the row of a node by name.
    pub fn find(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Names of nodes other than `except` seen within `window`.
    pub fn active_except(&self, except: &str, window: std::time::Duration) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.name != except && !n.is_expired(self.now, window))
            .map(|n| n.name.clone())
            .collect()
    }
}
