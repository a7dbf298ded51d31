pub mod cluster;
pub mod db;
pub mod instances;
pub mod migrations;
pub mod upgrade;

pub use cluster::{
    CommandRelay, CoordinationError, CoordinationStore, GracefulShutdown, HeartbeatConfig,
    HeartbeatEngine, MemoryCoordinationStore, PgCoordinationStore, ShutdownConfig,
};
pub use db::Database;
pub use instances::InstanceRegistry;
pub use migrations::{Migration, MigrationRunner};
pub use upgrade::{Handoff, OrchestratorConfig, UpgradeOrchestrator};
