use crate::command::{CancellationFlag, ExecError};
use crate::paths::current_user;
use crate::store;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::debug;

const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Decides whether a repository needs confirmation before it is pushed. Keyed by name.
pub trait ExclusionPolicy: Send + Sync {
    fn is_excluded(&self, repo_name: &str) -> bool;
}

/// Read-only snapshot of the excluded repository names for one machine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl ExclusionPolicy for ExclusionSet {
    fn is_excluded(&self, repo_name: &str) -> bool {
        self.names.contains(repo_name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExclusionChoice {
    Push,
    Skip,
    Manual,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExclusionRequest {
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub timeout: Duration,
    /// When the gate stops waiting. Prompts that queue must not outlive it.
    pub deadline: Instant,
}

impl ExclusionRequest {
    pub fn new(repo_name: &str, repo_path: &Path, timeout: Duration) -> Self {
        Self {
            repo_name: repo_name.to_string(),
            repo_path: repo_path.to_path_buf(),
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Asks someone what to do with an excluded repository.
///
/// `request` must not block for long: the answer is delivered through `reply`, and the
/// gate stops waiting once the request timeout elapses.
pub trait ExclusionPrompt: Send + Sync {
    fn request(&self, request: ExclusionRequest, reply: mpsc::Sender<ExclusionChoice>);

    fn show_manual_instructions(&self, _repo_name: &str, _repo_path: &Path) {}
}

/// Answers `skip` immediately. Used for unattended runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoSkipPrompt;

impl ExclusionPrompt for AutoSkipPrompt {
    fn request(&self, _request: ExclusionRequest, reply: mpsc::Sender<ExclusionChoice>) {
        let _ = reply.send(ExclusionChoice::Skip);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateOutcome {
    Chosen(ExclusionChoice),
    TimedOut,
    /// The prompt dropped its reply channel without answering.
    Abandoned,
}

/// Presents `request` and waits for an answer, the timeout, or cancellation.
pub fn await_choice(
    prompt: &dyn ExclusionPrompt,
    request: ExclusionRequest,
    cancel: &CancellationFlag,
) -> Result<GateOutcome, ExecError> {
    let deadline = request.deadline;
    let repo_name = request.repo_name.clone();
    let (tx, rx) = mpsc::channel();
    prompt.request(request, tx);
    loop {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining.min(WAIT_SLICE)) {
            Ok(choice) => {
                debug!(repo = %repo_name, choice = ?choice, "exclusion decision received");
                return Ok(GateOutcome::Chosen(choice));
            }
            Err(RecvTimeoutError::Disconnected) => return Ok(GateOutcome::Abandoned),
            Err(RecvTimeoutError::Timeout) if remaining <= WAIT_SLICE => {
                debug!(repo = %repo_name, "exclusion decision timed out");
                return Ok(GateOutcome::TimedOut);
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExclusionsDoc {
    version: String,
    #[serde(default)]
    machines: BTreeMap<String, MachineExclusions>,
}

impl Default for ExclusionsDoc {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            machines: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MachineExclusions {
    #[serde(default)]
    excluded_repos: Vec<String>,
}

/// Per-machine exclusion list persisted as JSON.
#[derive(Clone, Debug)]
pub struct ExclusionStore {
    path: PathBuf,
    machine: String,
}

impl ExclusionStore {
    pub fn open(path: &Path) -> Self {
        Self::for_machine(path, &current_user())
    }

    pub fn for_machine(path: &Path, machine: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            machine: machine.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn list(&self) -> anyhow::Result<Vec<String>> {
        let doc = self.load()?;
        Ok(doc
            .machines
            .get(&self.machine)
            .map(|machine| machine.excluded_repos.clone())
            .unwrap_or_default())
    }

    /// Returns `false` when the repository was already excluded.
    pub fn add(&self, repo_name: &str) -> anyhow::Result<bool> {
        let repo_name = repo_name.trim();
        if repo_name.is_empty() {
            anyhow::bail!("repository name must not be empty");
        }
        let mut doc = self.load()?;
        let machine = doc.machines.entry(self.machine.clone()).or_default();
        if machine.excluded_repos.iter().any(|name| name == repo_name) {
            return Ok(false);
        }
        machine.excluded_repos.push(repo_name.to_string());
        self.save(&doc)?;
        Ok(true)
    }

    /// Returns `false` when the repository was not excluded.
    pub fn remove(&self, repo_name: &str) -> anyhow::Result<bool> {
        let repo_name = repo_name.trim();
        let mut doc = self.load()?;
        let Some(machine) = doc.machines.get_mut(&self.machine) else {
            return Ok(false);
        };
        let before = machine.excluded_repos.len();
        machine.excluded_repos.retain(|name| name != repo_name);
        if machine.excluded_repos.len() == before {
            return Ok(false);
        }
        self.save(&doc)?;
        Ok(true)
    }

    pub fn snapshot(&self) -> anyhow::Result<ExclusionSet> {
        Ok(ExclusionSet::new(self.list()?))
    }

    fn load(&self) -> anyhow::Result<ExclusionsDoc> {
        store::load_or_default(&self.path).context("load exclusions")
    }

    fn save(&self, doc: &ExclusionsDoc) -> anyhow::Result<()> {
        store::save_atomic(&self.path, doc).context("save exclusions")
    }
}
