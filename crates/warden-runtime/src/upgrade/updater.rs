use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};
use warden_core::config::GameConfig;

use super::UpgradeError;

const AUTOUPDATE_CFG: &str = "autoupdate.cfg";
const DEFAULT_BRANCH: &str = "release";

/// A game-server installation on disk.
///
/// Branch and version come from the installation's `autoupdate.cfg` and are
/// cached until the next successful update.
pub struct GameInstallation {
    root: PathBuf,
    updater: PathBuf,
    scripting_file: PathBuf,
    cached: Mutex<Option<(String, String)>>,
}

impl GameInstallation {
    pub fn new(root: impl Into<PathBuf>, config: &GameConfig) -> Self {
        Self {
            root: root.into(),
            updater: config.updater.clone(),
            scripting_file: config.scripting_file.clone(),
            cached: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn updater_path(&self) -> PathBuf {
        self.root.join(&self.updater)
    }

    pub fn scripting_file(&self) -> PathBuf {
        self.root.join(&self.scripting_file)
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(AUTOUPDATE_CFG)
    }

    fn read_config(&self) -> Result<serde_json::Value, UpgradeError> {
        let content = std::fs::read_to_string(self.config_path())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Installed branch and version.
    pub fn branch_and_version(&self) -> Result<(String, String), UpgradeError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = cached.as_ref() {
            return Ok(known.clone());
        }

        let data = self.read_config()?;
        let branch = data
            .get("branch")
            .and_then(|b| b.as_str())
            .unwrap_or(DEFAULT_BRANCH)
            .to_string();
        let version = data
            .get("version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| UpgradeError::Updater(format!("no version in {}", AUTOUPDATE_CFG)))?
            .to_string();

        *cached = Some((branch.clone(), version.clone()));
        Ok((branch, version))
    }

    pub fn clear_cache(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Point the installation at another branch. Returns whether it changed.
    pub fn set_branch(&self, branch: &str) -> Result<bool, UpgradeError> {
        let mut data = self.read_config()?;
        if data.get("branch").and_then(|b| b.as_str()) == Some(branch) {
            return Ok(false);
        }
        if let Some(object) = data.as_object_mut() {
            object.insert("branch".to_string(), serde_json::Value::from(branch));
        }
        std::fs::write(self.config_path(), serde_json::to_string_pretty(&data)?)?;
        self.clear_cache();
        Ok(true)
    }
}

/// Runs the external game updater.
#[async_trait]
pub trait GameUpdater: Send + Sync {
    /// Update to the latest version of `branch` (or the installed branch).
    /// Returns the updater's exit code; anything but zero is a failure.
    async fn update(&self, branch: Option<&str>) -> i32;
}

/// Updater executable shipped with the installation.
pub struct UpdaterProcess {
    installation: Arc<GameInstallation>,
}

impl UpdaterProcess {
    pub fn new(installation: Arc<GameInstallation>) -> Self {
        Self { installation }
    }

    async fn run(installation: Arc<GameInstallation>, branch: Option<String>) -> i32 {
        let mut command = Command::new(installation.updater_path());
        command.args(["--quiet", "update"]);
        if let Some(branch) = &branch {
            command.arg(format!("@{}", branch));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        debug!(updater = %installation.updater_path().display(), branch = ?branch, "Running updater");
        let rc = match command.status().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!(error = %e, "Failed to run updater");
                return -1;
            }
        };

        if rc == 0 {
            if let Some(branch) = &branch {
                match installation.set_branch(branch) {
                    Ok(true) => info!(branch = %branch, "Switched update branch"),
                    Ok(false) => {}
                    Err(e) => error!(error = %e, "Failed to record branch switch"),
                }
            }
        }
        rc
    }
}

#[async_trait]
impl GameUpdater for UpdaterProcess {
    async fn update(&self, branch: Option<&str>) -> i32 {
        let task = tokio::spawn(Self::run(
            self.installation.clone(),
            branch.map(str::to_string),
        ));
        match task.await {
            Ok(rc) => rc,
            Err(e) => {
                error!(error = %e, "Updater task failed");
                -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn installation(dir: &TempDir, cfg: &str) -> GameInstallation {
        std::fs::write(dir.path().join(AUTOUPDATE_CFG), cfg).unwrap();
        GameInstallation::new(dir.path(), &GameConfig::default())
    }

    #[test]
    fn test_branch_and_version() {
        let dir = TempDir::new().unwrap();
        let install = installation(&dir, r#"{"branch": "openbeta", "version": "2.9.2.49940"}"#);

        assert_eq!(
            install.branch_and_version().unwrap(),
            ("openbeta".to_string(), "2.9.2.49940".to_string())
        );
    }

    #[test]
    fn test_default_branch_and_cache() {
        let dir = TempDir::new().unwrap();
        let install = installation(&dir, r#"{"version": "2.9.1"}"#);
        assert_eq!(install.branch_and_version().unwrap().0, "release");

        std::fs::write(dir.path().join(AUTOUPDATE_CFG), r#"{"version": "2.9.2"}"#).unwrap();
        assert_eq!(install.branch_and_version().unwrap().1, "2.9.1");

        install.clear_cache();
        assert_eq!(install.branch_and_version().unwrap().1, "2.9.2");
    }

    #[test]
    fn test_set_branch_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let install = installation(
            &dir,
            r#"{"branch": "release", "version": "2.9.2", "modules": ["WORLD", "SUPERCARRIER"]}"#,
        );

        assert!(install.set_branch("openbeta").unwrap());
        assert!(!install.set_branch("openbeta").unwrap());

        let data: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(AUTOUPDATE_CFG)).unwrap(),
        )
        .unwrap();
        assert_eq!(data["branch"], "openbeta");
        assert_eq!(data["modules"][1], "SUPERCARRIER");
    }

    #[test]
    fn test_missing_version_is_error() {
        let dir = TempDir::new().unwrap();
        let install = installation(&dir, r#"{"branch": "release"}"#);
        assert!(install.branch_and_version().is_err());
    }

    #[tokio::test]
    async fn test_missing_updater_reports_failure() {
        let dir = TempDir::new().unwrap();
        let install = Arc::new(installation(&dir, r#"{"version": "2.9.2"}"#));
        let updater = UpdaterProcess::new(install);
        assert_eq!(updater.update(None).await, -1);
    }
}
