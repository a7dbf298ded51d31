use super::node::GuildId;

/// Per-guild leader state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    pub guild: GuildId,
    /// Name of the master node.
    pub master: String,
    /// Version the fleet is expected to run.
    pub version: String,
    /// A fleet upgrade is in progress; leadership changes are deferred.
    pub update_pending: bool,
}

/// The cluster as seen by one node at the start of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// No cluster row exists for the guild.
    NoCluster,
    /// This node is the recorded master.
    SelfIsMaster,
    /// Another node is master and its heartbeat is fresh.
    OtherIsMasterAlive,
    /// Another node is master but its heartbeat expired or its row is gone.
    OtherIsMasterPresumedDead,
    /// This node runs an older version than the fleet.
    VersionMismatchBehind,
    /// This node runs a newer version than the fleet.
    VersionMismatchAhead,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCluster => "no_cluster",
            Self::SelfIsMaster => "self_is_master",
            Self::OtherIsMasterAlive => "other_is_master_alive",
            Self::OtherIsMasterPresumedDead => "other_is_master_presumed_dead",
            Self::VersionMismatchBehind => "version_mismatch_behind",
            Self::VersionMismatchAhead => "version_mismatch_ahead",
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of a node within its guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Agent,
}

impl NodeRole {
    pub fn from_master(is_master: bool) -> Self {
        if is_master {
            Self::Master
        } else {
            Self::Agent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "MASTER",
            Self::Agent => "AGENT",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ClusterState::NoCluster.as_str(), "no_cluster");
        assert_eq!(
            ClusterState::OtherIsMasterPresumedDead.to_string(),
            "other_is_master_presumed_dead"
        );
    }

    #[test]
    fn test_role_from_flag() {
        assert_eq!(NodeRole::from_master(true), NodeRole::Master);
        assert_eq!(NodeRole::from_master(false).to_string(), "AGENT");
    }
}
