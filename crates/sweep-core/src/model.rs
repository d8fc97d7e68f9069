use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ScanKind {
    Pull,
    Push,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Pull => "pull",
            ScanKind::Push => "push",
        }
    }

    /// Wire field carrying the per-repository delta.
    pub fn delta_field(&self) -> &'static str {
        match self {
            ScanKind::Pull => "Behind",
            ScanKind::Push => "FilesChanged",
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one repository produced by a scan.
///
/// `delta` is "commits behind" for pull scans and "files changed" for push scans.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepoStatus {
    pub name: String,
    pub path: PathBuf,
    pub delta: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanResult {
    pub repos: Vec<RepoStatus>,
    pub duration: Duration,
    /// Set when the scan itself failed, as opposed to finding nothing.
    pub error: Option<String>,
}

impl ScanResult {
    pub fn empty(duration: Duration) -> Self {
        Self {
            repos: Vec::new(),
            duration,
            error: None,
        }
    }

    pub fn failed(message: &str, duration: Duration) -> Self {
        let message = if message.is_empty() { "Scan failed" } else { message };
        Self {
            error: Some(message.to_string()),
            ..Self::empty(duration)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn total_delta(&self) -> u64 {
        self.repos.iter().map(|repo| u64::from(repo.delta)).sum()
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    #[default]
    Error,
    Conflict,
    Missing,
    Skipped,
    Cancelled,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::Error => "ERROR",
            StatusCode::Conflict => "CONFLICT",
            StatusCode::Missing => "MISSING",
            StatusCode::Skipped => "SKIPPED",
            StatusCode::Cancelled => "CANCELLED",
        }
    }

    pub fn counts_as_skipped(&self) -> bool {
        matches!(self, StatusCode::Skipped | StatusCode::Cancelled)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a per-repository operation, as seen by the scheduler.
pub trait Outcome {
    fn status(&self) -> StatusCode;
    fn repo_name(&self) -> &str;
}

#[derive(Clone, Debug, PartialEq)]
pub struct PullResult {
    pub status: StatusCode,
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub error_message: String,
    pub warnings: Vec<String>,
    pub conflict_files: Vec<String>,
}

impl PullResult {
    pub fn error(repo_name: &str, repo_path: PathBuf, message: &str) -> Self {
        Self {
            status: StatusCode::Error,
            repo_name: repo_name.to_string(),
            repo_path,
            error_message: message.to_string(),
            warnings: Vec::new(),
            conflict_files: Vec::new(),
        }
    }
}

impl Outcome for PullResult {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn repo_name(&self) -> &str {
        &self.repo_name
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PushResult {
    pub status: StatusCode,
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub error_message: String,
    pub warnings: Vec<String>,
    pub is_excluded: bool,
}

impl PushResult {
    pub fn error(repo_name: &str, repo_path: PathBuf, message: &str) -> Self {
        Self {
            status: StatusCode::Error,
            repo_name: repo_name.to_string(),
            repo_path,
            error_message: message.to_string(),
            warnings: Vec::new(),
            is_excluded: false,
        }
    }
}

impl Outcome for PushResult {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn repo_name(&self) -> &str {
        &self.repo_name
    }
}

/// Aggregate counters for one phase. Only the scheduler's aggregation loop writes them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunCounters {
    pub completed: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunCounters {
    pub fn record(&mut self, status: StatusCode) {
        match status {
            StatusCode::Success => self.success += 1,
            StatusCode::Skipped | StatusCode::Cancelled => self.skipped += 1,
            StatusCode::Error | StatusCode::Conflict | StatusCode::Missing => self.failed += 1,
        }
        self.completed += 1;
    }

    pub fn is_balanced(&self) -> bool {
        self.completed == self.success + self.failed + self.skipped
    }
}

/// Action the caller intends to take after a push run. Only reported, never executed here.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAction {
    #[default]
    Shutdown,
    Restart,
    ShutdownCancel,
    RestartCancel,
    None,
}

impl PostAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostAction::Shutdown => "shutdown",
            PostAction::Restart => "restart",
            PostAction::ShutdownCancel => "shutdown_cancel",
            PostAction::RestartCancel => "restart_cancel",
            PostAction::None => "none",
        }
    }

    pub fn commit_prefix(&self) -> &'static str {
        match self {
            PostAction::Shutdown => "Shutdown",
            PostAction::Restart => "Restart",
            PostAction::ShutdownCancel => "Shutdown (Cancelled)",
            PostAction::RestartCancel => "Restart (Cancelled)",
            PostAction::None => "Sync",
        }
    }

    pub fn is_power_action(&self) -> bool {
        matches!(self, PostAction::Shutdown | PostAction::Restart)
    }
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostAction {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "shutdown" => Ok(PostAction::Shutdown),
            "restart" => Ok(PostAction::Restart),
            "shutdown_cancel" => Ok(PostAction::ShutdownCancel),
            "restart_cancel" => Ok(PostAction::RestartCancel),
            "none" => Ok(PostAction::None),
            other => anyhow::bail!("unknown post action: {other}"),
        }
    }
}
