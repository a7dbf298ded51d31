use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};
use warden_core::cluster::FleetVersion;
use warden_core::config::{GameConfig, UpdateConfig};

use super::UpgradeError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("warden/", env!("CARGO_PKG_VERSION"));

/// Outcome of asking a release source for a newer version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    UpToDate,
    /// A newer release exists, identified by version or revision.
    Available(String),
}

/// Where newer node software comes from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn check(&self, running: &FleetVersion) -> Result<ReleaseStatus, UpgradeError>;
}

/// Release listing over HTTP, newest release first.
pub struct HttpReleaseSource {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

impl HttpReleaseSource {
    pub fn new(url: impl Into<String>) -> Result<Self, UpgradeError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn latest_tag(&self) -> Result<Option<String>, UpgradeError> {
        let releases: Vec<Release> = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(releases.into_iter().next().map(|r| r.tag_name))
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn check(&self, running: &FleetVersion) -> Result<ReleaseStatus, UpgradeError> {
        let Some(tag) = self.latest_tag().await? else {
            return Ok(ReleaseStatus::UpToDate);
        };
        compare_tag(&tag, running)
    }
}

fn compare_tag(tag: &str, running: &FleetVersion) -> Result<ReleaseStatus, UpgradeError> {
    let latest = FleetVersion::parse(tag).map_err(|e| UpgradeError::Source(e.to_string()))?;
    if &latest > running {
        Ok(ReleaseStatus::Available(latest.to_string()))
    } else {
        Ok(ReleaseStatus::UpToDate)
    }
}

/// Compares the checkout's HEAD with the tracked branch on a git remote.
pub struct GitReleaseSource {
    repo: PathBuf,
    remote: String,
}

impl GitReleaseSource {
    pub fn new(repo: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            remote: remote.into(),
        }
    }

    /// Whether `dir` is a git working checkout.
    pub fn is_checkout(dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    async fn git(&self, args: &[&str]) -> Result<String, UpgradeError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpgradeError::Source(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ReleaseSource for GitReleaseSource {
    async fn check(&self, _running: &FleetVersion) -> Result<ReleaseStatus, UpgradeError> {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let current = self.git(&["rev-parse", "HEAD"]).await?;
        self.git(&["fetch", "--quiet", self.remote.as_str()]).await?;
        let remote_ref = format!("{}/{}", self.remote, branch);
        let latest = self.git(&["rev-parse", remote_ref.as_str()]).await?;

        debug!(branch = %branch, current = %current, latest = %latest, "Compared with remote");
        if latest != current {
            Ok(ReleaseStatus::Available(latest))
        } else {
            Ok(ReleaseStatus::UpToDate)
        }
    }
}

/// Uses git when running from a checkout, the release listing otherwise.
pub struct ReleaseChecker {
    git: Option<GitReleaseSource>,
    http: HttpReleaseSource,
}

impl ReleaseChecker {
    pub fn new(install_dir: &Path, config: &UpdateConfig) -> Result<Self, UpgradeError> {
        let git = GitReleaseSource::is_checkout(install_dir)
            .then(|| GitReleaseSource::new(install_dir, config.git_remote.clone()));
        Ok(Self {
            git,
            http: HttpReleaseSource::new(config.release_url.clone())?,
        })
    }

    pub fn shared(self) -> Arc<dyn ReleaseSource> {
        Arc::new(self)
    }
}

#[async_trait]
impl ReleaseSource for ReleaseChecker {
    async fn check(&self, running: &FleetVersion) -> Result<ReleaseStatus, UpgradeError> {
        debug!("Checking for updates...");
        if let Some(git) = &self.git {
            match git.check(running).await {
                Ok(status) => return Ok(status),
                Err(e) => warn!(error = %e, "Git update check failed, using release listing"),
            }
        }
        self.http.check(running).await
    }
}

/// Latest game-server version for an update branch.
#[async_trait]
pub trait GameVersionSource: Send + Sync {
    async fn latest_version(&self, branch: &str) -> Result<Option<String>, UpgradeError>;
}

#[derive(Debug, Deserialize)]
struct BranchVersions {
    versions2: Vec<BranchVersion>,
}

#[derive(Debug, Deserialize)]
struct BranchVersion {
    version: String,
}

/// Version endpoint of the game vendor.
pub struct HttpGameVersionSource {
    client: reqwest::Client,
    url_template: String,
    credentials: Option<(String, Option<String>)>,
}

impl HttpGameVersionSource {
    pub fn new(config: &GameConfig) -> Result<Self, UpgradeError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url_template: config.version_url.clone(),
            credentials: config
                .user
                .clone()
                .map(|user| (user, config.password.clone())),
        })
    }

    fn url_for(&self, branch: &str) -> String {
        self.url_template.replace("{}", branch)
    }
}

#[async_trait]
impl GameVersionSource for HttpGameVersionSource {
    async fn latest_version(&self, branch: &str) -> Result<Option<String>, UpgradeError> {
        let mut request = self.client.get(self.url_for(branch));
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            debug!(status = %response.status(), branch, "Version endpoint returned no data");
            return Ok(None);
        }

        let body: BranchVersions = response.json().await?;
        Ok(body.versions2.into_iter().last().map(|v| v.version))
    }
}
