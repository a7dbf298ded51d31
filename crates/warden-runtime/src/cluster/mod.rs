mod heartbeat;
mod memory;
mod postgres;
mod relay;
mod shutdown;
mod store;

pub(crate) use heartbeat::MIN_PERIOD;
pub use heartbeat::{HeartbeatConfig, HeartbeatEngine, TickOutcome};
pub use memory::{InstanceRow, MemoryCoordinationStore};
pub use postgres::PgCoordinationStore;
pub use relay::CommandRelay;
pub use shutdown::{GracefulShutdown, ShutdownConfig};
pub use store::{CoordinationError, CoordinationStore, CoordinationTx, InstanceStore, StoreResult};
