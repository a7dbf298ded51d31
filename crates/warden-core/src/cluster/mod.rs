mod command;
mod node;
mod state;
mod version;

pub use command::{NodeAction, NodeCommand};
pub use node::{GuildId, LockedNodes, NodeIdentity, NodeRecord};
pub use state::{ClusterRecord, ClusterState, NodeRole};
pub use version::FleetVersion;
