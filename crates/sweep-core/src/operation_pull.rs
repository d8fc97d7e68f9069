use crate::clock;
use crate::command::{CommandOutput, ExecError};
use crate::model::{PullResult, StatusCode};
use crate::operation::{
    DEFAULT_OPERATION_TIMEOUT, OperationWire, collect_warnings, has_unmerged_paths,
    missing_reason,
};
use crate::task::{Emitter, Script, Shell, Task, TaskError, TaskEvent};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const LOCAL_CHANGE_MARKERS: [&str; 3] = [
    "your local changes",
    "would be overwritten",
    "commit your changes or stash them",
];

/// Pulls one repository, stashing local changes around the pull when git refuses.
#[derive(Clone, Debug)]
pub struct PullOperation {
    repo_name: String,
    repo_path: PathBuf,
    timeout: Duration,
    skip_excluded: bool,
}

impl PullOperation {
    pub fn new(repo_name: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_name: repo_name.into(),
            repo_path: repo_path.into(),
            timeout: DEFAULT_OPERATION_TIMEOUT,
            skip_excluded: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks the repository as excluded; it is reported as skipped without touching git.
    pub fn skip_excluded(mut self, excluded: bool) -> Self {
        self.skip_excluded = excluded;
        self
    }
}

impl Task for PullOperation {
    type Output = PullResult;
    type Command = PullScript;

    fn label(&self) -> String {
        format!("pull:{}", self.repo_name)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn use_no_window(&self) -> bool {
        true
    }

    fn build_command(&self) -> PullScript {
        PullScript {
            repo_name: self.repo_name.clone(),
            repo_path: self.repo_path.clone(),
            skip_excluded: self.skip_excluded,
        }
    }

    fn parse_result(&self, output: &str, _elapsed: Duration) -> Result<PullResult, TaskError> {
        let wire = OperationWire::parse(output)?;
        let repo_name = if wire.repo_name.is_empty() {
            self.repo_name.clone()
        } else {
            wire.repo_name
        };
        Ok(PullResult {
            status: wire.status,
            repo_name,
            repo_path: self.repo_path.clone(),
            error_message: wire.error_message,
            warnings: wire.warnings,
            conflict_files: wire.conflict_files,
        })
    }

    fn error_result(&self, message: &str, _elapsed: Duration) -> PullResult {
        PullResult::error(&self.repo_name, self.repo_path.clone(), message)
    }

    fn announce(&self, result: &PullResult, emitter: &Emitter<PullResult>) {
        if result.status == StatusCode::Conflict {
            emitter.emit(TaskEvent::Conflict {
                repo_name: result.repo_name.clone(),
                repo_path: result.repo_path.clone(),
            });
        }
    }
}

#[derive(Debug)]
enum PullState {
    Start,
    Pulling,
    Stashing,
    RetryPull,
    Popping,
    InspectConflicts { pop_output: String },
    Done(OperationWire),
}

pub struct PullScript {
    repo_name: String,
    repo_path: PathBuf,
    skip_excluded: bool,
}

impl PullScript {
    fn done(&self, status: StatusCode) -> OperationWire {
        OperationWire::new(status, &self.repo_name)
    }

    fn step(
        &self,
        state: PullState,
        shell: &Shell<'_>,
        warnings: &mut Vec<String>,
    ) -> Result<PullState, ExecError> {
        let repo = self.repo_path.as_path();
        let next = match state {
            PullState::Start => {
                if self.skip_excluded {
                    PullState::Done(
                        self.done(StatusCode::Skipped)
                            .message("Skipped (excluded repository)")
                            .excluded(),
                    )
                } else if let Some(reason) = missing_reason(repo) {
                    PullState::Done(self.done(StatusCode::Missing).message(reason))
                } else {
                    PullState::Pulling
                }
            }
            PullState::Pulling => {
                let output = run_git(shell, repo, &["pull"], warnings)?;
                let text = output.combined();
                if output.success() {
                    PullState::Done(self.done(StatusCode::Success))
                } else if mentions_local_changes(&text) {
                    PullState::Stashing
                } else {
                    PullState::Done(self.done(StatusCode::Error).message(text))
                }
            }
            PullState::Stashing => {
                let message = format!("Auto-stash {}", clock::display_now());
                let args = ["stash", "push", "-m", message.as_str()];
                let output = run_git(shell, repo, &args, warnings)?;
                if output.success() {
                    PullState::RetryPull
                } else {
                    PullState::Done(
                        self.done(StatusCode::Error)
                            .message(format!("Failed to stash changes: {}", output.combined())),
                    )
                }
            }
            PullState::RetryPull => {
                let output = run_git(shell, repo, &["pull"], warnings)?;
                if output.success() {
                    PullState::Popping
                } else {
                    PullState::Done(
                        self.done(StatusCode::Error)
                            .message(format!("Pull failed after stashing: {}", output.combined())),
                    )
                }
            }
            PullState::Popping => {
                let output = run_git(shell, repo, &["stash", "pop"], warnings)?;
                if output.success() {
                    PullState::Done(self.done(StatusCode::Success))
                } else {
                    PullState::InspectConflicts {
                        pop_output: output.combined(),
                    }
                }
            }
            PullState::InspectConflicts { pop_output } => {
                let status = shell.git(repo, ["status", "--porcelain"])?;
                if has_unmerged_paths(&status.stdout) {
                    let diff = shell.git(repo, ["diff", "--name-only", "--diff-filter=U"])?;
                    let mut wire = self
                        .done(StatusCode::Conflict)
                        .message("Merge conflicts detected");
                    wire.conflict_files = diff
                        .stdout
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(str::to_string)
                        .collect();
                    PullState::Done(wire)
                } else {
                    PullState::Done(
                        self.done(StatusCode::Error)
                            .message(format!("Failed to restore stash: {pop_output}")),
                    )
                }
            }
            PullState::Done(wire) => PullState::Done(wire),
        };
        Ok(next)
    }
}

impl Script for PullScript {
    fn run(&self, shell: &Shell<'_>) -> Result<CommandOutput, ExecError> {
        let mut warnings = Vec::new();
        let mut state = PullState::Start;
        let mut wire = loop {
            state = match state {
                PullState::Done(wire) => break wire,
                other => {
                    debug!(repo = %self.repo_name, state = ?other, "pull step");
                    self.step(other, shell, &mut warnings)?
                }
            };
        };
        wire.warnings = warnings;
        info!(repo = %self.repo_name, status = %wire.status, "pull finished");
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

fn mentions_local_changes(output: &str) -> bool {
    let lowered = output.to_ascii_lowercase();
    LOCAL_CHANGE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
