use crate::clock;
use crate::command::{CommandOutput, ExecError};
use crate::config::DEFAULT_EXCLUDE_CONFIRMATION_TIMEOUT;
use crate::exclusion::{
    AutoSkipPrompt, ExclusionChoice, ExclusionPolicy, ExclusionPrompt, ExclusionRequest,
    ExclusionSet, GateOutcome, await_choice,
};
use crate::model::{PostAction, PushResult, StatusCode};
use crate::operation::{
    DEFAULT_OPERATION_TIMEOUT, OperationWire, collect_warnings, missing_reason,
    porcelain_entries,
};
use crate::task::{Script, Shell, Task, TaskError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How excluded repositories are recognised and confirmed.
#[derive(Clone)]
pub struct ExclusionGate {
    pub policy: Arc<dyn ExclusionPolicy>,
    pub prompt: Arc<dyn ExclusionPrompt>,
    pub timeout: Duration,
}

impl ExclusionGate {
    pub fn new(policy: Arc<dyn ExclusionPolicy>, prompt: Arc<dyn ExclusionPrompt>) -> Self {
        Self {
            policy,
            prompt,
            timeout: DEFAULT_EXCLUDE_CONFIRMATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ExclusionGate {
    fn default() -> Self {
        Self::new(Arc::new(ExclusionSet::default()), Arc::new(AutoSkipPrompt))
    }
}

/// Commits every local change in one repository and pushes it.
#[derive(Clone)]
pub struct PushOperation {
    repo_name: String,
    repo_path: PathBuf,
    timeout: Duration,
    commit_prefix: String,
    user: String,
    gate: ExclusionGate,
}

impl PushOperation {
    pub fn new(
        repo_name: impl Into<String>,
        repo_path: impl Into<PathBuf>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            repo_path: repo_path.into(),
            timeout: DEFAULT_OPERATION_TIMEOUT,
            commit_prefix: PostAction::default().commit_prefix().to_string(),
            user: user.into(),
            gate: ExclusionGate::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_commit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_prefix = prefix.into();
        self
    }

    pub fn with_gate(mut self, gate: ExclusionGate) -> Self {
        self.gate = gate;
        self
    }
}

impl Task for PushOperation {
    type Output = PushResult;
    type Command = PushScript;

    fn label(&self) -> String {
        format!("push:{}", self.repo_name)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn use_no_window(&self) -> bool {
        true
    }

    fn build_command(&self) -> PushScript {
        PushScript {
            repo_name: self.repo_name.clone(),
            repo_path: self.repo_path.clone(),
            commit_prefix: self.commit_prefix.clone(),
            user: self.user.clone(),
            gate: self.gate.clone(),
        }
    }

    fn parse_result(&self, output: &str, _elapsed: Duration) -> Result<PushResult, TaskError> {
        let wire = OperationWire::parse(output)?;
        let repo_name = if wire.repo_name.is_empty() {
            self.repo_name.clone()
        } else {
            wire.repo_name
        };
        Ok(PushResult {
            status: wire.status,
            repo_name,
            repo_path: self.repo_path.clone(),
            error_message: wire.error_message,
            warnings: wire.warnings,
            is_excluded: wire.is_excluded,
        })
    }

    fn error_result(&self, message: &str, _elapsed: Duration) -> PushResult {
        PushResult::error(&self.repo_name, self.repo_path.clone(), message)
    }
}

#[derive(Debug)]
enum PushState {
    Start,
    ExclusionCheck,
    Staging,
    Committing,
    Pushing,
    Done(OperationWire),
}

pub struct PushScript {
    repo_name: String,
    repo_path: PathBuf,
    commit_prefix: String,
    user: String,
    gate: ExclusionGate,
}

impl PushScript {
    fn done(&self, status: StatusCode) -> OperationWire {
        OperationWire::new(status, &self.repo_name)
    }

    fn step(
        &self,
        state: PushState,
        shell: &Shell<'_>,
        warnings: &mut Vec<String>,
        excluded: &mut bool,
    ) -> Result<PushState, ExecError> {
        let repo = self.repo_path.as_path();
        let next = match state {
            PushState::Start => match missing_reason(repo) {
                Some(reason) => PushState::Done(self.done(StatusCode::Missing).message(reason)),
                None => PushState::ExclusionCheck,
            },
            PushState::ExclusionCheck => {
                if !self.gate.policy.is_excluded(&self.repo_name) {
                    PushState::Staging
                } else {
                    *excluded = true;
                    self.confirm_excluded(shell)?
                }
            }
            PushState::Staging => {
                let status = run_git(shell, repo, &["status", "--porcelain"], warnings)?;
                if !status.success() {
                    PushState::Done(self.done(StatusCode::Error).message(format!(
                        "Failed to read status: {}",
                        status.combined()
                    )))
                } else if status.stdout.trim().is_empty() {
                    PushState::Done(
                        self.done(StatusCode::Success)
                            .message("No changes to commit"),
                    )
                } else {
                    let add = run_git(shell, repo, &["add", "-A"], warnings)?;
                    if add.success() {
                        PushState::Committing
                    } else {
                        PushState::Done(self.done(StatusCode::Error).message(format!(
                            "Failed to stage changes: {}",
                            add.combined()
                        )))
                    }
                }
            }
            PushState::Committing => {
                let staged = run_git(shell, repo, &["status", "--porcelain"], warnings)?;
                let message = CommitMessage::build(
                    &self.commit_prefix,
                    &self.user,
                    &clock::display_now(),
                    &staged.stdout,
                );
                let args = ["commit", "-m", message.title.as_str(), "-m", message.body.as_str()];
                let commit = run_git(shell, repo, &args, warnings)?;
                if commit.success() {
                    PushState::Pushing
                } else {
                    PushState::Done(self.done(StatusCode::Error).message(format!(
                        "Failed to commit changes: {}",
                        commit.combined()
                    )))
                }
            }
            PushState::Pushing => {
                let push = run_git(shell, repo, &["push"], warnings)?;
                if push.success() {
                    PushState::Done(self.done(StatusCode::Success))
                } else {
                    PushState::Done(
                        self.done(StatusCode::Error)
                            .message(format!("Failed to push: {}", push.combined())),
                    )
                }
            }
            PushState::Done(wire) => PushState::Done(wire),
        };
        Ok(next)
    }

    fn confirm_excluded(&self, shell: &Shell<'_>) -> Result<PushState, ExecError> {
        let request = ExclusionRequest::new(&self.repo_name, &self.repo_path, self.gate.timeout);
        let outcome = await_choice(self.gate.prompt.as_ref(), request, shell.cancellation())?;
        let skipped = |message: &str| {
            PushState::Done(
                self.done(StatusCode::Skipped)
                    .message(message)
                    .excluded(),
            )
        };
        let next = match outcome {
            GateOutcome::Chosen(ExclusionChoice::Push) => PushState::Staging,
            GateOutcome::Chosen(ExclusionChoice::Skip) => skipped("Skipped (excluded repository)"),
            GateOutcome::Chosen(ExclusionChoice::Manual) => {
                self.gate
                    .prompt
                    .show_manual_instructions(&self.repo_name, &self.repo_path);
                skipped("User chose manual push")
            }
            GateOutcome::TimedOut => {
                info!(repo = %self.repo_name, "no exclusion decision before timeout; skipping");
                skipped("Skipped (excluded repository)")
            }
            GateOutcome::Abandoned => PushState::Done(
                self.done(StatusCode::Cancelled)
                    .message("Exclusion prompt closed without an answer")
                    .excluded(),
            ),
        };
        Ok(next)
    }
}

impl Script for PushScript {
    fn run(&self, shell: &Shell<'_>) -> Result<CommandOutput, ExecError> {
        let mut warnings = Vec::new();
        let mut excluded = false;
        let mut state = PushState::Start;
        let mut wire = loop {
            state = match state {
                PushState::Done(wire) => break wire,
                other => {
                    debug!(repo = %self.repo_name, state = ?other, "push step");
                    self.step(other, shell, &mut warnings, &mut excluded)?
                }
            };
        };
        wire.warnings = warnings;
        wire.is_excluded |= excluded;
        info!(repo = %self.repo_name, status = %wire.status, "push finished");
        wire.render()
    }
}

fn run_git(
    shell: &Shell<'_>,
    repo: &Path,
    args: &[&str],
    warnings: &mut Vec<String>,
) -> Result<CommandOutput, ExecError> {
    let output = shell.git(repo, args)?;
    collect_warnings(&output, warnings);
    Ok(output)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitMessage {
    pub title: String,
    pub body: String,
}

impl CommitMessage {
    /// Title `"<prefix> commit by <user> on <timestamp>"`, body listing each changed file.
    pub fn build(prefix: &str, user: &str, timestamp: &str, porcelain: &str) -> Self {
        let mut body = String::from("Changed files:");
        for (code, file) in porcelain_entries(porcelain) {
            body.push_str("\n- ");
            body.push_str(&change_kind(code));
            body.push_str(": ");
            body.push_str(file);
        }
        Self {
            title: format!("{prefix} commit by {user} on {timestamp}"),
            body,
        }
    }

    pub fn full(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

fn change_kind(code: &str) -> String {
    let code = code.trim();
    if code == "??" {
        return "Untracked".to_string();
    }
    let kind = match code.chars().next() {
        Some('M') => "Modified",
        Some('A') => "Added",
        Some('D') => "Deleted",
        Some('R') => "Renamed",
        Some('C') => "Copied",
        Some('U') => "Updated",
        _ => return code.to_string(),
    };
    kind.to_string()
}
