//! Node self-upgrade and the game-server drain/update/resume cycle.

mod audit;
mod desanitize;
mod hooks;
mod orchestrator;
mod release;
mod supervisor;
mod updater;

pub use audit::{AuditSink, TracingAudit};
pub use desanitize::desanitize;
pub use hooks::{HookStage, UpdateHook, UpdateHooks};
pub use orchestrator::{Handoff, OrchestratorConfig, ServerSet, UpgradeOrchestrator};
pub use release::{
    GameVersionSource, GitReleaseSource, HttpGameVersionSource, HttpReleaseSource,
    ReleaseChecker, ReleaseSource, ReleaseStatus,
};
pub use supervisor::{ExecSupervisor, ProcessSupervisor};
pub use updater::{GameInstallation, GameUpdater, UpdaterProcess};

use warden_core::WardenError;

/// Errors raised while checking for or applying an upgrade.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("release source failed: {0}")]
    Source(String),

    #[error("updater failed: {0}")]
    Updater(String),

    #[error("process replacement failed: {0}")]
    Supervisor(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data: {0}")]
    Data(#[from] serde_json::Error),
}

impl From<UpgradeError> for WardenError {
    fn from(e: UpgradeError) -> Self {
        WardenError::Upgrade(e.to_string())
    }
}
