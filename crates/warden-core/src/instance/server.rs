use async_trait::async_trait;
use thiserror::Error;

/// Lifecycle status of a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Not yet known to the node.
    Unregistered,
    /// Process not running.
    Shutdown,
    /// Starting up or loading a mission.
    Loading,
    /// Process up, no mission running.
    Stopped,
    /// Mission loaded but paused.
    Paused,
    /// Mission running.
    Running,
}

impl ServerStatus {
    /// Whether the server must be shut down before the software is replaced.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Unregistered | Self::Shutdown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Shutdown => "shutdown",
            Self::Loading => "loading",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Running => "running",
        }
    }
}

/// Audience of an in-game popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalition {
    All,
    Red,
    Blue,
}

/// Errors raised by a game server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Timeout while {0}")]
    Timeout(String),

    #[error("Server error: {0}")]
    Other(String),
}

/// Game server process controlled by this node.
///
/// Implementations own the process; the coordination core only drives
/// maintenance, warnings, shutdown and startup through this interface.
#[async_trait]
pub trait GameServer: Send + Sync {
    fn name(&self) -> String;

    fn status(&self) -> ServerStatus;

    /// Server is managed by another node.
    fn is_remote(&self) -> bool;

    fn maintenance(&self) -> bool;

    fn set_maintenance(&self, maintenance: bool);

    /// Players are connected.
    fn is_populated(&self) -> bool;

    async fn send_popup_message(&self, coalition: Coalition, message: &str);

    async fn shutdown(&self) -> Result<(), ServerError>;

    async fn startup(&self) -> Result<(), ServerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(!ServerStatus::Unregistered.is_active());
        assert!(!ServerStatus::Shutdown.is_active());
        assert!(ServerStatus::Running.is_active());
        assert!(ServerStatus::Paused.is_active());
        assert!(ServerStatus::Stopped.is_active());
    }
}
