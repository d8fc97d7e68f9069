use crate::model::PostAction;
use crate::operation::DEFAULT_OPERATION_TIMEOUT;
use crate::scan::{DEFAULT_COUNT_TIMEOUT, DEFAULT_SCAN_TIMEOUT, DEFAULT_THROTTLE};
use crate::store;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_EXCLUDE_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(3000);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root: Option<PathBuf>,
    pub git: GitSettings,
    pub merge_tool: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub throttle_limit: usize,
    pub count_timeout_secs: u64,
    pub scan_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub exclude_confirmation_timeout_secs: u64,
    pub default_post_action: PostAction,
    pub exclude_repos_affect_pull: bool,
    pub shutdown_grace_ms: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            throttle_limit: DEFAULT_THROTTLE,
            count_timeout_secs: DEFAULT_COUNT_TIMEOUT.as_secs(),
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT.as_secs(),
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT.as_secs(),
            exclude_confirmation_timeout_secs: DEFAULT_EXCLUDE_CONFIRMATION_TIMEOUT.as_secs(),
            default_post_action: PostAction::default(),
            exclude_repos_affect_pull: false,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE.as_millis() as u64,
        }
    }
}

/// Immutable settings snapshot taken when a run starts.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSettings {
    pub scan_paths: Vec<PathBuf>,
    pub throttle: usize,
    pub count_timeout: Duration,
    pub scan_timeout: Duration,
    pub operation_timeout: Duration,
    pub exclude_confirmation_timeout: Duration,
    pub exclude_repos_affect_pull: bool,
    pub shutdown_grace: Duration,
}

impl RunSettings {
    pub fn new(scan_paths: Vec<PathBuf>) -> Self {
        AppConfig::default().run_settings(scan_paths)
    }

    pub fn with_throttle(mut self, throttle: usize) -> Self {
        self.throttle = throttle.max(1);
        self
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        store::load_or_default(path)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        store::save_atomic(path, self)
    }

    pub fn run_settings(&self, scan_paths: Vec<PathBuf>) -> RunSettings {
        let git = &self.git;
        RunSettings {
            scan_paths,
            throttle: git.throttle_limit.max(1),
            count_timeout: Duration::from_secs(git.count_timeout_secs.max(1)),
            scan_timeout: Duration::from_secs(git.scan_timeout_secs.max(1)),
            operation_timeout: Duration::from_secs(git.operation_timeout_secs.max(1)),
            exclude_confirmation_timeout: Duration::from_secs(
                git.exclude_confirmation_timeout_secs,
            ),
            exclude_repos_affect_pull: git.exclude_repos_affect_pull,
            shutdown_grace: Duration::from_millis(git.shutdown_grace_ms),
        }
    }
}
