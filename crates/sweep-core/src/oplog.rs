use crate::clock;
use crate::model::{PullResult, PushResult, StatusCode};
use crate::paths::sanitize_repo_name;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;
use uuid::Uuid;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: String,
    pub run_id: String,
    pub operation: String,
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub status: StatusCode,
    pub error_message: String,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_excluded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_prefix: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogStats {
    pub files: usize,
    pub bytes: u64,
    pub repos: usize,
}

/// Per-repository JSON log files, one per operation, grouped by run id.
#[derive(Clone, Debug)]
pub struct OperationLog {
    dir: PathBuf,
    run_id: String,
}

impl OperationLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record_pull(&self, result: &PullResult) -> anyhow::Result<PathBuf> {
        let entry = LogEntry {
            error_message: result.error_message.clone(),
            warnings: result.warnings.clone(),
            conflict_files: Some(result.conflict_files.clone()),
            ..self.entry("pull", &result.repo_name, &result.repo_path, result.status)
        };
        self.write(&entry)
    }

    pub fn record_push(&self, result: &PushResult, commit_prefix: &str) -> anyhow::Result<PathBuf> {
        let entry = LogEntry {
            error_message: result.error_message.clone(),
            warnings: result.warnings.clone(),
            is_excluded: Some(result.is_excluded),
            commit_prefix: Some(commit_prefix.to_string()),
            ..self.entry("push", &result.repo_name, &result.repo_path, result.status)
        };
        self.write(&entry)
    }

    /// Deletes every log, or only logs older than `days`. Returns the number of files removed.
    pub fn clear(&self, days: Option<u32>) -> anyhow::Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = days.map(cutoff_for);
        let mut removed = 0;
        for repo_dir in read_dirs(&self.dir)? {
            for file in read_files(&repo_dir)? {
                if let Some(cutoff) = cutoff {
                    if modified(&file)? >= cutoff {
                        continue;
                    }
                }
                fs::remove_file(&file)
                    .with_context(|| format!("remove log {}", file.display()))?;
                removed += 1;
            }
            if fs::read_dir(&repo_dir)
                .with_context(|| format!("read {}", repo_dir.display()))?
                .next()
                .is_none()
            {
                fs::remove_dir(&repo_dir)
                    .with_context(|| format!("remove {}", repo_dir.display()))?;
            }
        }
        debug!(removed, ?days, "cleared operation logs");
        Ok(removed)
    }

    /// Totals for every log, or only logs older than `days`.
    pub fn stats(&self, days: Option<u32>) -> anyhow::Result<LogStats> {
        let mut stats = LogStats::default();
        if !self.dir.exists() {
            return Ok(stats);
        }
        let cutoff = days.map(cutoff_for);
        let mut repos = BTreeSet::new();
        for repo_dir in read_dirs(&self.dir)? {
            for file in read_files(&repo_dir)? {
                if let Some(cutoff) = cutoff {
                    if modified(&file)? >= cutoff {
                        continue;
                    }
                }
                stats.files += 1;
                stats.bytes += fs::metadata(&file)
                    .with_context(|| format!("stat {}", file.display()))?
                    .len();
                repos.insert(repo_dir.clone());
            }
        }
        stats.repos = repos.len();
        Ok(stats)
    }

    fn entry(
        &self,
        operation: &str,
        repo_name: &str,
        repo_path: &Path,
        status: StatusCode,
    ) -> LogEntry {
        LogEntry {
            timestamp: clock::display_now(),
            run_id: self.run_id.clone(),
            operation: operation.to_string(),
            repo_name: repo_name.to_string(),
            repo_path: repo_path.to_path_buf(),
            status,
            error_message: String::new(),
            warnings: Vec::new(),
            conflict_files: None,
            is_excluded: None,
            commit_prefix: None,
        }
    }

    fn write(&self, entry: &LogEntry) -> anyhow::Result<PathBuf> {
        let repo_dir = self.dir.join(sanitize_repo_name(&entry.repo_name));
        fs::create_dir_all(&repo_dir)
            .with_context(|| format!("create log directory {}", repo_dir.display()))?;
        let stamp = clock::format(clock::now(), clock::FILE_STAMP_FORMAT);
        let mut path = repo_dir.join(format!("{}-{stamp}.log", entry.operation));
        let mut attempt = 1;
        while path.exists() {
            attempt += 1;
            path = repo_dir.join(format!("{}-{stamp}-{attempt}.log", entry.operation));
        }
        let data = serde_json::to_string_pretty(entry).context("serialize log entry")?;
        fs::write(&path, data).with_context(|| format!("write log {}", path.display()))?;
        Ok(path)
    }
}

fn cutoff_for(days: u32) -> SystemTime {
    let age = Duration::from_secs(u64::from(days) * SECONDS_PER_DAY);
    SystemTime::now()
        .checked_sub(age)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn modified(path: &Path) -> anyhow::Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("read modification time of {}", path.display()))
}

fn read_dirs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn read_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}
