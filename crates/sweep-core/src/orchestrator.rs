//! Phase driver: scan, fan out one operation per out-of-sync repository, aggregate.

use crate::command::{CancellationFlag, CommandExecutor};
use crate::config::RunSettings;
use crate::exclusion::{AutoSkipPrompt, ExclusionPolicy, ExclusionPrompt, ExclusionSet};
use crate::model::{
    Outcome, PostAction, PullResult, PushResult, RepoStatus, RunCounters, ScanKind, ScanResult,
};
use crate::operation_pull::PullOperation;
use crate::operation_push::{ExclusionGate, PushOperation};
use crate::oplog::OperationLog;
use crate::paths::current_user;
use crate::scan::{ScanSettings, ScanTask};
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskEvent};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Progress notifications delivered to the caller on the thread that started the run.
#[derive(Debug)]
pub enum RunEvent<'a, R> {
    ScanProgress { current: usize, total: usize },
    ScanFinished(&'a ScanResult),
    ScanFailed { message: &'a str },
    NothingToDo,
    TaskError { label: &'a str, message: &'a str },
    Conflict { repo_name: &'a str, repo_path: &'a Path },
    RepoFinished {
        result: &'a R,
        counters: &'a RunCounters,
        total: usize,
    },
    PhaseComplete {
        counters: &'a RunCounters,
        post_action: Option<PostAction>,
    },
}

pub type RunReporter<'a, R> = dyn FnMut(RunEvent<'_, R>) + 'a;

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary<R> {
    pub scan: ScanResult,
    pub counters: RunCounters,
    pub results: Vec<R>,
    pub cancelled: bool,
    pub scan_failed: bool,
    pub post_action: Option<PostAction>,
}

impl<R> RunSummary<R> {
    fn new(scan: ScanResult, post_action: Option<PostAction>) -> Self {
        Self {
            scan_failed: scan.is_failed(),
            scan,
            counters: RunCounters::default(),
            results: Vec::new(),
            cancelled: false,
            post_action,
        }
    }

    /// The post action is only carried out after a clean, complete push run that
    /// found something to push.
    pub fn should_execute_post_action(&self) -> bool {
        !self.cancelled
            && !self.scan_failed
            && self.counters.completed > 0
            && self.counters.failed == 0
            && self.post_action.is_some_and(|action| action.is_power_action())
    }
}

pub struct Orchestrator {
    settings: RunSettings,
    executor: Arc<dyn CommandExecutor>,
    exclusions: Arc<dyn ExclusionPolicy>,
    prompt: Arc<dyn ExclusionPrompt>,
    cancel: CancellationFlag,
    user: String,
    log: Option<OperationLog>,
}

impl Orchestrator {
    pub fn new(settings: RunSettings, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            settings,
            executor,
            exclusions: Arc::new(ExclusionSet::default()),
            prompt: Arc::new(AutoSkipPrompt),
            cancel: CancellationFlag::new(),
            user: current_user(),
            log: None,
        }
    }

    pub fn with_exclusions(mut self, exclusions: Arc<dyn ExclusionPolicy>) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ExclusionPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_operation_log(mut self, log: OperationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Requests shutdown. The running phase stops dispatching, discards results that
    /// finish afterwards, and waits at most the grace period for in-flight work.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.cancel.cancel();
    }

    pub fn scan<R>(
        &self,
        kind: ScanKind,
        reporter: &mut RunReporter<'_, R>,
    ) -> Option<ScanResult> {
        let settings = ScanSettings {
            scan_paths: self.settings.scan_paths.clone(),
            throttle: self.settings.throttle,
            count_timeout: self.settings.count_timeout,
            scan_timeout: self.settings.scan_timeout,
        };
        let task = match kind {
            ScanKind::Pull => ScanTask::pull(settings),
            ScanKind::Push => ScanTask::push(settings),
        };
        let scan = self.scheduler().run_single(task, |event| match event {
            TaskEvent::Progress { current, total } => reporter(RunEvent::ScanProgress {
                current: *current,
                total: *total,
            }),
            TaskEvent::Error { label, message } => {
                reporter(RunEvent::TaskError { label, message })
            }
            TaskEvent::Conflict { .. } | TaskEvent::Finished(_) => {}
        })?;
        match scan.error.as_deref() {
            Some(message) => {
                warn!(kind = %kind, error = %message, "scan failed");
                reporter(RunEvent::ScanFailed { message });
            }
            None => {
                info!(kind = %kind, repos = scan.repos.len(), delta = scan.total_delta(), "scan finished");
                reporter(RunEvent::ScanFinished(&scan));
            }
        }
        Some(scan)
    }

    pub fn pull(&self, reporter: &mut RunReporter<'_, PullResult>) -> RunSummary<PullResult> {
        let exclusions = Arc::clone(&self.exclusions);
        let affect_pull = self.settings.exclude_repos_affect_pull;
        let timeout = self.settings.operation_timeout;
        self.run_phase(
            ScanKind::Pull,
            None,
            reporter,
            |repo| {
                PullOperation::new(repo.name.clone(), repo.path.clone())
                    .with_timeout(timeout)
                    .skip_excluded(affect_pull && exclusions.is_excluded(&repo.name))
            },
            |log: &OperationLog, result: &PullResult| log.record_pull(result).map(|_| ()),
        )
    }

    pub fn push(
        &self,
        post_action: PostAction,
        reporter: &mut RunReporter<'_, PushResult>,
    ) -> RunSummary<PushResult> {
        let gate = ExclusionGate::new(Arc::clone(&self.exclusions), Arc::clone(&self.prompt))
            .with_timeout(self.settings.exclude_confirmation_timeout);
        let timeout = self.settings.operation_timeout;
        let prefix = post_action.commit_prefix();
        self.run_phase(
            ScanKind::Push,
            Some(post_action),
            reporter,
            |repo| {
                PushOperation::new(repo.name.clone(), repo.path.clone(), self.user.clone())
                    .with_timeout(timeout)
                    .with_commit_prefix(prefix)
                    .with_gate(gate.clone())
            },
            |log: &OperationLog, result: &PushResult| {
                log.record_push(result, prefix).map(|_| ())
            },
        )
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(Arc::clone(&self.executor), self.cancel.clone())
            .with_throttle(self.settings.throttle)
            .with_grace(self.settings.shutdown_grace)
    }

    fn run_phase<T, B, L>(
        &self,
        kind: ScanKind,
        post_action: Option<PostAction>,
        reporter: &mut RunReporter<'_, T::Output>,
        build: B,
        record: L,
    ) -> RunSummary<T::Output>
    where
        T: Task + 'static,
        T::Output: Outcome,
        B: Fn(&RepoStatus) -> T,
        L: Fn(&OperationLog, &T::Output) -> anyhow::Result<()>,
    {
        let Some(scan) = self.scan(kind, reporter) else {
            return RunSummary {
                cancelled: self.cancel.is_cancelled(),
                ..RunSummary::new(ScanResult::empty(Duration::ZERO), post_action)
            };
        };
        let mut summary = RunSummary::new(scan, post_action);
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
            return summary;
        }
        if summary.scan_failed {
            return summary;
        }
        if summary.scan.repos.is_empty() {
            info!(kind = %kind, "nothing to do");
            reporter(RunEvent::NothingToDo);
            return summary;
        }

        let tasks: Vec<T> = summary.scan.repos.iter().map(&build).collect();
        let total = tasks.len();
        let outcome = self.scheduler().run(tasks, |event, counters| match event {
            TaskEvent::Finished(result) => {
                if let Some(log) = &self.log {
                    if let Err(err) = record(log, result) {
                        warn!(
                            repo = %result.repo_name(),
                            error = %err,
                            "failed to write operation log"
                        );
                    }
                }
                reporter(RunEvent::RepoFinished {
                    result,
                    counters,
                    total,
                });
            }
            TaskEvent::Error { label, message } => {
                reporter(RunEvent::TaskError { label, message })
            }
            TaskEvent::Conflict {
                repo_name,
                repo_path,
            } => reporter(RunEvent::Conflict {
                repo_name,
                repo_path,
            }),
            TaskEvent::Progress { .. } => {}
        });

        summary.counters = outcome.counters;
        summary.results = outcome.results;
        summary.cancelled = outcome.cancelled;
        if !summary.cancelled {
            reporter(RunEvent::PhaseComplete {
                counters: &summary.counters,
                post_action,
            });
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::exclusion::{ExclusionChoice, ExclusionRequest};
    use crate::model::StatusCode;
    use crate::testing::ScriptedExecutor;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Mutex, mpsc};
    use tempfile::TempDir;

    fn repo(root: &TempDir, name: &str) -> PathBuf {
        let path = root.path().join(name);
        fs::create_dir_all(path.join(".git")).unwrap();
        path
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn behind(executor: ScriptedExecutor, path: &Path, count: &str) -> ScriptedExecutor {
        executor
            .on(&key(path), "fetch", CommandOutput::ok(""))
            .on(&key(path), "rev-parse", CommandOutput::ok("origin/main\n"))
            .on(&key(path), "rev-list", CommandOutput::ok(count))
    }

    fn settings(root: &TempDir) -> RunSettings {
        RunSettings::new(vec![root.path().to_path_buf()]).with_throttle(4)
    }

    #[derive(Default)]
    struct Recorded {
        names: Vec<String>,
    }

    fn labels<R: Outcome>(recorded: &mut Recorded) -> impl FnMut(RunEvent<'_, R>) + '_ {
        move |event| {
            let name = match event {
                RunEvent::ScanProgress { total, .. } => format!("progress:{total}"),
                RunEvent::ScanFinished(scan) => format!("scanned:{}", scan.repos.len()),
                RunEvent::ScanFailed { message } => format!("scan-failed:{message}"),
                RunEvent::NothingToDo => "nothing".to_string(),
                RunEvent::TaskError { label, .. } => format!("error:{label}"),
                RunEvent::Conflict { repo_name, .. } => format!("conflict:{repo_name}"),
                RunEvent::RepoFinished { result, .. } => {
                    format!("finished:{}:{}", result.repo_name(), result.status())
                }
                RunEvent::PhaseComplete { counters, .. } => format!("complete:{}", counters.completed),
            };
            recorded.names.push(name);
        }
    }

    #[test]
    fn pull_run_covers_success_stash_and_conflict() {
        let root = TempDir::new().unwrap();
        let dotfiles = repo(&root, "dotfiles");
        let nvim = repo(&root, "nvim-config");
        let api = repo(&root, "api-project");
        let synced = repo(&root, "synced");
        let overwrite = "error: Your local changes to the following files would be overwritten by merge";

        let executor = behind(ScriptedExecutor::new(), &dotfiles, "1\n")
            .on(&key(&dotfiles), "pull", CommandOutput::ok("Fast-forward\n"));
        let executor = behind(executor, &nvim, "2\n")
            .on(&key(&nvim), "pull", CommandOutput::failed(1, overwrite))
            .on(&key(&nvim), "pull", CommandOutput::ok(""))
            .on(&key(&nvim), "stash push", CommandOutput::ok(""))
            .on(&key(&nvim), "stash pop", CommandOutput::ok(""));
        let executor = behind(executor, &api, "3\n")
            .on(&key(&api), "pull", CommandOutput::failed(1, overwrite))
            .on(&key(&api), "pull", CommandOutput::ok(""))
            .on(&key(&api), "stash push", CommandOutput::ok(""))
            .on(&key(&api), "stash pop", CommandOutput::failed(1, "CONFLICT (content)"))
            .on(&key(&api), "status --porcelain", CommandOutput::ok("UU config.json\n"))
            .on(&key(&api), "diff --name-only", CommandOutput::ok("config.json\n"));
        let executor = behind(executor, &synced, "0\n");

        let logs = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(settings(&root), Arc::new(executor))
            .with_operation_log(OperationLog::new(logs.path()));
        let mut recorded = Recorded::default();
        let summary = orchestrator.pull(&mut labels(&mut recorded));

        assert_eq!(summary.scan.repos.len(), 3);
        assert_eq!(summary.counters.completed, 3);
        assert_eq!(summary.counters.success, 2);
        assert_eq!(summary.counters.failed, 1);
        assert!(summary.counters.is_balanced());
        assert!(!summary.cancelled);
        assert_eq!(summary.post_action, None);

        let conflict = summary
            .results
            .iter()
            .find(|result| result.repo_name == "api-project")
            .unwrap();
        assert_eq!(conflict.status, StatusCode::Conflict);
        assert_eq!(conflict.conflict_files, vec!["config.json"]);

        assert_eq!(recorded.names[0], "progress:4");
        assert_eq!(recorded.names[1], "scanned:3");
        assert!(recorded.names.contains(&"conflict:api-project".to_string()));
        assert!(recorded.names.contains(&"finished:dotfiles:SUCCESS".to_string()));
        assert!(recorded.names.contains(&"finished:nvim-config:SUCCESS".to_string()));
        assert_eq!(recorded.names.last().unwrap(), "complete:3");
        assert_eq!(OperationLog::new(logs.path()).stats(None).unwrap().files, 3);
    }

    #[test]
    fn failed_scan_is_not_reported_as_nothing_to_do() {
        let root = TempDir::new().unwrap();
        let slow = repo(&root, "slow");
        let executor = ScriptedExecutor::new().on_timeout(&key(&slow), "status");
        let orchestrator = Orchestrator::new(settings(&root), Arc::new(executor));
        let mut recorded = Recorded::default();
        let summary = orchestrator.push(PostAction::Shutdown, &mut labels(&mut recorded));

        assert!(summary.scan_failed);
        assert!(!summary.cancelled);
        assert_eq!(summary.counters, RunCounters::default());
        assert!(!recorded.names.contains(&"nothing".to_string()));
        assert_eq!(recorded.names.last().unwrap(), "scan-failed:Timeout");
        assert!(!summary.should_execute_post_action());
    }

    #[test]
    fn nothing_to_do_skips_dispatch() {
        let root = TempDir::new().unwrap();
        let clean = repo(&root, "clean");
        let executor = ScriptedExecutor::new().on(&key(&clean), "status", CommandOutput::ok(""));
        let orchestrator = Orchestrator::new(settings(&root), Arc::new(executor));
        let mut recorded = Recorded::default();
        let summary = orchestrator.push(PostAction::None, &mut labels(&mut recorded));
        assert!(summary.scan.repos.is_empty());
        assert_eq!(summary.counters, RunCounters::default());
        assert_eq!(recorded.names.last().unwrap(), "nothing");
        assert!(!summary.scan_failed);
        assert!(!summary.should_execute_post_action());
    }

    struct SilentPrompt {
        held: Mutex<Vec<mpsc::Sender<ExclusionChoice>>>,
    }

    impl ExclusionPrompt for SilentPrompt {
        fn request(&self, _request: ExclusionRequest, reply: mpsc::Sender<ExclusionChoice>) {
            self.held.lock().unwrap().push(reply);
        }
    }

    #[test]
    fn push_run_skips_unconfirmed_exclusions() {
        let root = TempDir::new().unwrap();
        let notes = repo(&root, "notes");
        let secret = repo(&root, "secret-repo");
        let executor = ScriptedExecutor::new()
            .on(&key(&notes), "status", CommandOutput::ok(" M todo.md\n"))
            .on(&key(&notes), "add", CommandOutput::ok(""))
            .on(&key(&notes), "commit", CommandOutput::ok(""))
            .on(&key(&notes), "push", CommandOutput::ok(""))
            .on(&key(&secret), "status", CommandOutput::ok("?? keys.txt\n"));
        let executor = Arc::new(executor);
        let mut settings = settings(&root);
        settings.exclude_confirmation_timeout = Duration::from_millis(200);
        let orchestrator = Orchestrator::new(settings, executor.clone())
            .with_exclusions(Arc::new(ExclusionSet::new(["secret-repo"])))
            .with_prompt(Arc::new(SilentPrompt {
                held: Mutex::new(Vec::new()),
            }))
            .with_user("alice");

        let mut recorded = Recorded::default();
        let summary = orchestrator.push(PostAction::Shutdown, &mut labels(&mut recorded));

        assert_eq!(summary.counters.completed, 2);
        assert_eq!(summary.counters.success, 1);
        assert_eq!(summary.counters.skipped, 1);
        assert!(summary.counters.is_balanced());
        let skipped = summary
            .results
            .iter()
            .find(|result| result.repo_name == "secret-repo")
            .unwrap();
        assert_eq!(skipped.status, StatusCode::Skipped);
        assert!(skipped.is_excluded);
        assert!(
            executor
                .calls_for(&key(&secret))
                .iter()
                .all(|call| call.starts_with("status"))
        );
        let commit = executor
            .calls_for(&key(&notes))
            .into_iter()
            .find(|call| call.starts_with("commit"))
            .unwrap();
        assert!(commit.starts_with("commit -m Shutdown commit by alice on "));
        assert_eq!(summary.post_action, Some(PostAction::Shutdown));
        assert!(summary.should_execute_post_action());
    }

    #[test]
    fn excluded_repos_can_be_skipped_for_pull() {
        let root = TempDir::new().unwrap();
        let secret = repo(&root, "secret-repo");
        let executor = behind(ScriptedExecutor::new(), &secret, "5\n");
        let executor = Arc::new(executor);
        let mut settings = settings(&root);
        settings.exclude_repos_affect_pull = true;
        let orchestrator = Orchestrator::new(settings, executor.clone())
            .with_exclusions(Arc::new(ExclusionSet::new(["secret-repo"])));
        let summary = orchestrator.pull(&mut |_| {});
        assert_eq!(summary.counters.skipped, 1);
        assert!(
            !executor
                .calls_for(&key(&secret))
                .iter()
                .any(|call| call == "pull")
        );
    }

    #[test]
    fn failed_push_blocks_post_action() {
        let root = TempDir::new().unwrap();
        let broken = repo(&root, "broken");
        let executor = ScriptedExecutor::new()
            .on(&key(&broken), "status", CommandOutput::ok(" M a\n"))
            .on(&key(&broken), "add", CommandOutput::failed(128, "fatal: index.lock"));
        let orchestrator = Orchestrator::new(settings(&root), Arc::new(executor));
        let summary = orchestrator.push(PostAction::Restart, &mut |_| {});
        assert_eq!(summary.counters.failed, 1);
        assert!(!summary.should_execute_post_action());
    }

    #[test]
    fn cancelled_run_reports_no_results() {
        let root = TempDir::new().unwrap();
        let dotfiles = repo(&root, "dotfiles");
        let flag = CancellationFlag::new();
        let executor = behind(ScriptedExecutor::new(), &dotfiles, "1\n")
            .on(&key(&dotfiles), "pull", CommandOutput::ok(""))
            .cancel_during("pull", flag.clone());
        let orchestrator =
            Orchestrator::new(settings(&root), Arc::new(executor)).with_cancellation(flag);

        let mut finished = 0;
        let summary = orchestrator.pull(&mut |event| {
            if matches!(event, RunEvent::RepoFinished { .. } | RunEvent::PhaseComplete { .. }) {
                finished += 1;
            }
        });
        assert_eq!(finished, 0);
        assert!(summary.cancelled);
        assert_eq!(summary.counters.completed, 0);
        assert!(!summary.should_execute_post_action());
    }

    #[test]
    fn shutdown_before_run_skips_scan() {
        let root = TempDir::new().unwrap();
        repo(&root, "dotfiles");
        let executor = Arc::new(ScriptedExecutor::new());
        let orchestrator = Orchestrator::new(settings(&root), executor.clone());
        orchestrator.shutdown();
        let summary = orchestrator.push(PostAction::Shutdown, &mut |_| {});
        assert!(summary.cancelled);
        assert!(executor.calls().is_empty());
        assert!(!summary.should_execute_post_action());
    }
}
