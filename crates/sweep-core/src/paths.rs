use anyhow::Context;
use directories::ProjectDirs;
use std::env;
use std::path::{Path, PathBuf};

/// Locations of every file the tool persists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppPaths {
    pub config: PathBuf,
    pub exclusions: PathBuf,
    pub custom_paths: PathBuf,
    pub log_dir: PathBuf,
    pub lock: PathBuf,
}

impl AppPaths {
    /// Platform directories, or everything beside `config_override` when one is given.
    pub fn resolve(config_override: Option<&Path>) -> anyhow::Result<Self> {
        match config_override {
            Some(config) => Ok(Self::beside(config)),
            None => Self::platform(),
        }
    }

    pub fn beside(config: &Path) -> Self {
        let dir = config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config: config.to_path_buf(),
            exclusions: dir.join("exclusions.json"),
            custom_paths: dir.join("custom_paths.json"),
            log_dir: dir.join("log"),
            lock: dir.join("git-sweep.lock"),
        }
    }

    fn platform() -> anyhow::Result<Self> {
        let project =
            ProjectDirs::from("com", "git-sweep", "git-sweep").context("resolve project dirs")?;
        let config_dir = project.config_dir();
        Ok(Self {
            config: config_dir.join("config.json"),
            exclusions: config_dir.join("exclusions.json"),
            custom_paths: config_dir.join("custom_paths.json"),
            log_dir: project.data_dir().join("log"),
            lock: project
                .runtime_dir()
                .unwrap_or(project.cache_dir())
                .join("git-sweep.lock"),
        })
    }
}

/// Machine-scoped user key used for exclusions, custom paths and commit titles.
pub fn current_user() -> String {
    ["USERNAME", "USER"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Makes a repository name safe to use as a directory name.
pub fn sanitize_repo_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();
    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}
