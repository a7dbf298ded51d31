use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Self-upgrade of the node software.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Release listing endpoint (JSON array, newest first, with `tag_name`).
    #[serde(default = "default_release_url")]
    pub release_url: String,

    /// Git remote compared against when the installation is a working checkout.
    #[serde(default = "default_git_remote")]
    pub git_remote: String,

    /// Updater entry point the process is replaced with.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: PathBuf,

    /// Extra arguments passed to the updater before the node's own arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            release_url: default_release_url(),
            git_remote: default_git_remote(),
            entrypoint: default_entrypoint(),
            args: Vec::new(),
        }
    }
}

fn default_release_url() -> String {
    "https://api.github.com/repos/example/warden/releases".to_string()
}

fn default_git_remote() -> String {
    "origin".to_string()
}

fn default_entrypoint() -> PathBuf {
    PathBuf::from("warden-update")
}

/// Game-server software managed by this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Installation directory of the game server.
    pub installation: Option<PathBuf>,

    /// Updater executable, relative to the installation.
    #[serde(default = "default_updater")]
    pub updater: PathBuf,

    /// Run the drain/update/resume cycle automatically.
    #[serde(default)]
    pub autoupdate: bool,

    /// Installation is shared by several nodes through a cloud drive.
    #[serde(default)]
    pub cloud: bool,

    /// Interval between version checks in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Countdown marks (seconds before shutdown) at which players are warned.
    #[serde(default = "default_warn_times")]
    pub warn_times: Vec<u64>,

    /// Reset the mission scripting environment after a successful update.
    #[serde(default = "default_true")]
    pub desanitize: bool,

    /// Mission scripting file, relative to the installation.
    #[serde(default = "default_scripting_file")]
    pub scripting_file: PathBuf,

    /// Version endpoint; `{}` is replaced by the branch name.
    #[serde(default = "default_version_url")]
    pub version_url: String,

    /// Account used against the version endpoint.
    pub user: Option<String>,

    /// Password for `user`.
    pub password: Option<String>,
}

impl GameConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            installation: None,
            updater: default_updater(),
            autoupdate: false,
            cloud: false,
            check_interval_secs: default_check_interval(),
            warn_times: default_warn_times(),
            desanitize: default_true(),
            scripting_file: default_scripting_file(),
            version_url: default_version_url(),
            user: None,
            password: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_updater() -> PathBuf {
    PathBuf::from("bin").join("dcs_updater.exe")
}

fn default_check_interval() -> u64 {
    300
}

fn default_warn_times() -> Vec<u64> {
    vec![300, 120, 60]
}

fn default_scripting_file() -> PathBuf {
    PathBuf::from("Scripts").join("MissionScripting.lua")
}

fn default_version_url() -> String {
    "https://www.digitalcombatsimulator.com/gameapi/updater/branch/{}/".to_string()
}
