mod cluster;
mod database;
mod logging;
mod update;

pub use cluster::ClusterConfig;
pub use database::DatabaseConfig;
pub use logging::LoggingConfig;
pub use update::{GameConfig, UpdateConfig};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};

static ENV_VAR: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid")
});

/// Root configuration for a warden node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Node identity and placement.
    pub node: NodeConfig,

    /// Coordination database.
    pub database: DatabaseConfig,

    /// Heartbeat and election timing.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Self-upgrade of the node software.
    #[serde(default)]
    pub update: UpdateConfig,

    /// Game-server software managed by this node.
    #[serde(default)]
    pub game: GameConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| WardenError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| WardenError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the background loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("cluster.heartbeat_interval_secs", self.cluster.heartbeat_interval_secs),
            ("cluster.heartbeat_timeout_secs", self.cluster.heartbeat_timeout_secs),
            ("cluster.command_poll_interval_secs", self.cluster.command_poll_interval_secs),
            ("game.check_interval_secs", self.game.check_interval_secs),
        ];
        for (key, value) in periods {
            if value == 0 {
                return Err(WardenError::Config(format!("{} must be at least 1", key)));
            }
        }
        Ok(())
    }

    /// Minimal configuration for a node in the given guild.
    pub fn for_guild(guild_id: i64, database_url: &str) -> Self {
        Self {
            node: NodeConfig {
                guild_id,
                ..Default::default()
            },
            database: DatabaseConfig {
                url: database_url.to_string(),
                ..Default::default()
            },
            cluster: ClusterConfig::default(),
            update: UpdateConfig::default(),
            game: GameConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Node identity and placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, unique within the guild. Defaults to the host name.
    pub name: Option<String>,

    /// Guild (deployment) this node belongs to.
    pub guild_id: i64,

    /// Take over mastership unconditionally on the next heartbeat.
    #[serde(default)]
    pub preferred_master: bool,

    /// Installation lives on a cloud-synced drive shared with the master.
    #[serde(default = "default_true")]
    pub cloud_drive: bool,

    /// Upgrade the node software automatically.
    #[serde(default)]
    pub autoupdate: bool,

    /// Installation directory of the node software.
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// File holding the persisted instance descriptors.
    #[serde(default = "default_instances_file")]
    pub instances_file: PathBuf,

    /// Root directory for instance home directories.
    #[serde(default = "default_instances_root")]
    pub instances_root: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            guild_id: 0,
            preferred_master: false,
            cloud_drive: default_true(),
            autoupdate: false,
            install_dir: default_install_dir(),
            instances_file: default_instances_file(),
            instances_root: default_instances_root(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_install_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_instances_file() -> PathBuf {
    PathBuf::from("instances.toml")
}

fn default_instances_root() -> PathBuf {
    PathBuf::from("instances")
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    for cap in ENV_VAR.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
