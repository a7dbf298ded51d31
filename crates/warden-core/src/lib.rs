pub mod cluster;
pub mod config;
pub mod error;
pub mod instance;

pub use cluster::{
    ClusterRecord, ClusterState, FleetVersion, GuildId, LockedNodes, NodeCommand, NodeIdentity,
    NodeRecord, NodeRole,
};
pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use instance::{GameServer, InstanceDescriptor, PortTriple, ServerStatus};
