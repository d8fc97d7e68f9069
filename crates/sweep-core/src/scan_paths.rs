use crate::paths::current_user;
use crate::store;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathRejected {
    #[error("Path must be an absolute path")]
    NotAbsolute,
    #[error("Path does not exist")]
    Missing,
    #[error("Path must be a directory")]
    NotDirectory,
    #[error("No permission to access this directory")]
    Unreadable,
    #[error("Path already exists in custom paths")]
    Duplicate,
}

#[derive(Debug, Serialize, Deserialize)]
struct CustomPathsDoc {
    version: String,
    #[serde(default)]
    machines: BTreeMap<String, MachinePaths>,
}

impl Default for CustomPathsDoc {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            machines: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MachinePaths {
    #[serde(default)]
    custom_paths: Vec<PathBuf>,
}

/// Additional scan roots configured per machine.
#[derive(Clone, Debug)]
pub struct CustomPathsStore {
    path: PathBuf,
    machine: String,
}

impl CustomPathsStore {
    pub fn open(path: &Path) -> Self {
        Self::for_machine(path, &current_user())
    }

    pub fn for_machine(path: &Path, machine: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            machine: machine.to_string(),
        }
    }

    pub fn list(&self) -> anyhow::Result<Vec<PathBuf>> {
        let doc = self.load()?;
        Ok(doc
            .machines
            .get(&self.machine)
            .map(|machine| machine.custom_paths.clone())
            .unwrap_or_default())
    }

    pub fn add(&self, candidate: &Path) -> anyhow::Result<()> {
        validate_scan_path(candidate)?;
        let mut doc = self.load()?;
        let machine = doc.machines.entry(self.machine.clone()).or_default();
        if machine.custom_paths.iter().any(|path| path == candidate) {
            return Err(PathRejected::Duplicate.into());
        }
        machine.custom_paths.push(candidate.to_path_buf());
        self.save(&doc)
    }

    /// Returns `false` when the path was not configured.
    pub fn remove(&self, candidate: &Path) -> anyhow::Result<bool> {
        let mut doc = self.load()?;
        let Some(machine) = doc.machines.get_mut(&self.machine) else {
            return Ok(false);
        };
        let before = machine.custom_paths.len();
        machine.custom_paths.retain(|path| path != candidate);
        if machine.custom_paths.len() == before {
            return Ok(false);
        }
        self.save(&doc)?;
        Ok(true)
    }

    /// Primary root first, then this machine's custom paths.
    pub fn all_scan_paths(&self, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut paths = vec![root.to_path_buf()];
        for path in self.list()? {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn load(&self) -> anyhow::Result<CustomPathsDoc> {
        store::load_or_default(&self.path).context("load custom paths")
    }

    fn save(&self, doc: &CustomPathsDoc) -> anyhow::Result<()> {
        store::save_atomic(&self.path, doc).context("save custom paths")
    }
}

pub fn validate_scan_path(path: &Path) -> Result<(), PathRejected> {
    if !path.is_absolute() {
        return Err(PathRejected::NotAbsolute);
    }
    if !path.exists() {
        return Err(PathRejected::Missing);
    }
    if !path.is_dir() {
        return Err(PathRejected::NotDirectory);
    }
    if fs::read_dir(path).is_err() {
        return Err(PathRejected::Unreadable);
    }
    Ok(())
}
