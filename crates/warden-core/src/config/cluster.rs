use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Heartbeat and election timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Interval between heartbeat ticks in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Age of the master's last-seen after which it is presumed dead (in seconds).
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Nodes seen within this window count as active for upgrade fan-out (in seconds).
    #[serde(default = "default_active_window")]
    pub active_window_secs: u64,

    /// How often the command relay is polled (in seconds).
    #[serde(default = "default_command_poll_interval")]
    pub command_poll_interval_secs: u64,
}

impl ClusterConfig {
    /// Never zero: a zero period stalls the tick loop.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }

    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_secs(self.command_poll_interval_secs.max(1))
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            active_window_secs: default_active_window(),
            command_poll_interval_secs: default_command_poll_interval(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_active_window() -> u64 {
    60
}

fn default_command_poll_interval() -> u64 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cluster_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(30));
        assert_eq!(config.active_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_periods_floor_at_one_second() {
        let config: ClusterConfig =
            toml::from_str("heartbeat_interval_secs = 0\ncommand_poll_interval_secs = 0").unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.command_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_cluster_config() {
        let toml = r#"
            heartbeat_interval_secs = 10
            heartbeat_timeout_secs = 90
        "#;

        let config: ClusterConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.heartbeat_interval_secs, 10);
        assert_eq!(config.heartbeat_timeout_secs, 90);
        assert_eq!(config.command_poll_interval_secs, 2);
    }
}
