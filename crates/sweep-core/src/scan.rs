use crate::command::{CommandOutput, ExecError};
use crate::model::{RepoStatus, ScanKind, ScanResult};
use crate::task::{Emitter, Script, Shell, Task, TaskError, TaskEvent};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_COUNT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_THROTTLE: usize = 30;

#[derive(Clone, Debug)]
pub struct ScanSettings {
    pub scan_paths: Vec<PathBuf>,
    pub throttle: usize,
    pub count_timeout: Duration,
    pub scan_timeout: Duration,
}

impl ScanSettings {
    pub fn new(scan_paths: Vec<PathBuf>) -> Self {
        Self {
            scan_paths,
            throttle: DEFAULT_THROTTLE,
            count_timeout: DEFAULT_COUNT_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

/// Counts candidate repositories under the scan paths.
pub type RepoCounter = fn(&[PathBuf]) -> usize;

/// Two-phase scan: count candidate repositories, then probe all of them in parallel.
#[derive(Clone, Debug)]
pub struct ScanTask {
    kind: ScanKind,
    settings: ScanSettings,
    counter: RepoCounter,
}

pub type PullScan = ScanTask;
pub type PushScan = ScanTask;

impl ScanTask {
    pub fn pull(settings: ScanSettings) -> PullScan {
        Self {
            kind: ScanKind::Pull,
            settings,
            counter: count_discovered,
        }
    }

    pub fn push(settings: ScanSettings) -> PushScan {
        Self {
            kind: ScanKind::Push,
            settings,
            counter: count_discovered,
        }
    }

    pub fn with_counter(mut self, counter: RepoCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn kind(&self) -> ScanKind {
        self.kind
    }
}

impl Task for ScanTask {
    type Output = ScanResult;
    type Command = DeltaScanScript;

    fn label(&self) -> String {
        format!("{}-scan", self.kind)
    }

    fn timeout(&self) -> Duration {
        self.settings.scan_timeout
    }

    fn build_command(&self) -> DeltaScanScript {
        DeltaScanScript {
            kind: self.kind,
            scan_paths: self.settings.scan_paths.clone(),
            throttle: self.settings.throttle.max(1),
        }
    }

    fn parse_result(&self, output: &str, elapsed: Duration) -> Result<ScanResult, TaskError> {
        let repos = parse_scan_output(output)?;
        Ok(ScanResult {
            repos,
            duration: elapsed,
            error: None,
        })
    }

    fn error_result(&self, message: &str, elapsed: Duration) -> ScanResult {
        ScanResult::failed(message, elapsed)
    }

    fn prepare(&self, _shell: &Shell<'_>, emitter: &Emitter<ScanResult>) {
        let total = count_repositories(
            &self.settings.scan_paths,
            self.settings.count_timeout,
            self.counter,
        );
        debug!(kind = %self.kind, total, "counted candidate repositories");
        emitter.emit(TaskEvent::Progress { current: 0, total });
    }
}

/// Directories directly under each scan path that contain a `.git` entry, in path order.
pub fn discover_repositories(scan_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut repos = Vec::new();
    for root in scan_paths {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = %root.display(), error = %err, "scan path not readable; skipping");
                continue;
            }
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && path.join(".git").exists())
            .collect();
        found.sort();
        repos.extend(found);
    }
    repos
}

fn count_discovered(scan_paths: &[PathBuf]) -> usize {
    discover_repositories(scan_paths).len()
}

/// Runs `counter` with a bounded wait. Any failure or timeout counts as zero.
pub fn count_repositories(
    scan_paths: &[PathBuf],
    timeout: Duration,
    counter: RepoCounter,
) -> usize {
    let (tx, rx) = mpsc::channel();
    let paths = scan_paths.to_vec();
    let spawned = thread::Builder::new()
        .name("repo-count".into())
        .spawn(move || {
            let _ = tx.send(counter(&paths));
        });
    if let Err(err) = spawned {
        warn!(error = %err, "failed to start repository count");
        return 0;
    }
    match rx.recv_timeout(timeout) {
        Ok(total) => total,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "repository count timed out");
            0
        }
    }
}

/// Probes every discovered repository with up to `throttle` concurrent workers and
/// renders the positive-delta ones as the scan wire array.
pub struct DeltaScanScript {
    kind: ScanKind,
    scan_paths: Vec<PathBuf>,
    throttle: usize,
}

impl Script for DeltaScanScript {
    fn run(&self, shell: &Shell<'_>) -> Result<CommandOutput, ExecError> {
        let shell = shell.with_deadline(Instant::now() + shell.timeout());
        let repos = discover_repositories(&self.scan_paths);
        let workers = self.throttle.min(repos.len());
        let next = AtomicUsize::new(0);
        let found: Mutex<Vec<(usize, RepoStatus)>> = Mutex::new(Vec::new());
        let fatal: Mutex<Option<ExecError>> = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if fatal.lock().map(|slot| slot.is_some()).unwrap_or(true) {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(path) = repos.get(index) else {
                            break;
                        };
                        match probe_repository(self.kind, &shell, path) {
                            Ok(Some(delta)) => {
                                if let Ok(mut found) = found.lock() {
                                    found.push((index, repo_status(path, delta)));
                                }
                            }
                            Ok(None) => {}
                            Err(err) => {
                                if let Ok(mut slot) = fatal.lock() {
                                    slot.get_or_insert(err);
                                }
                                break;
                            }
                        }
                    }
                });
            }
        });

        if let Some(err) = fatal.into_inner().ok().flatten() {
            return Err(err);
        }
        let mut found = found.into_inner().unwrap_or_default();
        found.sort_by_key(|(index, _)| *index);
        let repos: Vec<RepoStatus> = found.into_iter().map(|(_, repo)| repo).collect();
        info!(kind = %self.kind, matched = repos.len(), "delta scan finished");
        Ok(CommandOutput::ok(render_scan_output(self.kind, &repos)))
    }
}

fn repo_status(path: &Path, delta: u32) -> RepoStatus {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    RepoStatus {
        name,
        path: path.to_path_buf(),
        delta,
    }
}

/// Returns the repository delta, `None` when it is in sync or cannot be inspected.
fn probe_repository(
    kind: ScanKind,
    shell: &Shell<'_>,
    repo: &Path,
) -> Result<Option<u32>, ExecError> {
    let delta = match kind {
        ScanKind::Pull => commits_behind(shell, repo)?,
        ScanKind::Push => files_changed(shell, repo)?,
    };
    Ok(delta.filter(|delta| *delta > 0))
}

fn commits_behind(shell: &Shell<'_>, repo: &Path) -> Result<Option<u32>, ExecError> {
    let fetch = shell.git(repo, ["fetch", "--quiet"])?;
    if !fetch.success() {
        debug!(repo = %repo.display(), "fetch failed; comparing against last known upstream");
    }
    let upstream = shell.git(repo, ["rev-parse", "--abbrev-ref", "@{upstream}"])?;
    let upstream_name = upstream.stdout.trim();
    if !upstream.success() || upstream_name.is_empty() {
        return Ok(None);
    }
    let range = format!("HEAD..{upstream_name}");
    let count = shell.git(repo, ["rev-list", "--count", range.as_str()])?;
    if !count.success() {
        return Ok(None);
    }
    Ok(count.stdout.trim().parse().ok())
}

fn files_changed(shell: &Shell<'_>, repo: &Path) -> Result<Option<u32>, ExecError> {
    let status = shell.git(repo, ["status", "--porcelain=1", "-b"])?;
    if !status.success() {
        return Ok(None);
    }
    let changed = status
        .stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.starts_with("##"))
        .count();
    Ok(u32::try_from(changed).ok())
}

#[derive(Deserialize)]
struct WireRepo {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Path")]
    path: PathBuf,
    #[serde(alias = "Behind", alias = "FilesChanged")]
    delta: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// Parses the scan wire payload. A bare object is treated as a one-element array;
/// entries without a positive delta are dropped.
pub fn parse_scan_output(output: &str) -> Result<Vec<RepoStatus>, serde_json::Error> {
    let output = output.trim();
    if output.is_empty() || output == "[]" {
        return Ok(Vec::new());
    }
    let items = match serde_json::from_str::<OneOrMany<WireRepo>>(output)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    };
    Ok(items
        .into_iter()
        .filter(|item| item.delta > 0)
        .map(|item| RepoStatus {
            name: item.name,
            path: item.path,
            delta: item.delta,
        })
        .collect())
}

pub fn render_scan_output(kind: ScanKind, repos: &[RepoStatus]) -> String {
    let items: Vec<Value> = repos
        .iter()
        .map(|repo| {
            let mut object = Map::new();
            object.insert("Name".into(), Value::from(repo.name.clone()));
            object.insert("Path".into(), Value::from(repo.path.display().to_string()));
            object.insert(kind.delta_field().into(), Value::from(repo.delta));
            Value::Object(object)
        })
        .collect();
    Value::Array(items).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CancellationFlag;
    use crate::task::run_task;
    use crate::testing::ScriptedExecutor;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn make_repo(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        fs::create_dir_all(path.join(".git")).unwrap();
        path
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn run_scan(task: &ScanTask, executor: &ScriptedExecutor) -> Vec<TaskEvent<ScanResult>> {
        let cancel = CancellationFlag::new();
        let (tx, rx) = mpsc::channel();
        let emitter = Emitter::new(tx, cancel.clone());
        run_task(task, executor, &cancel, &emitter);
        drop(emitter);
        rx.into_iter().collect()
    }

    fn finished(events: &[TaskEvent<ScanResult>]) -> ScanResult {
        match events.last() {
            Some(TaskEvent::Finished(result)) => result.clone(),
            other => panic!("expected finished event, got {other:?}"),
        }
    }

    #[test]
    fn single_object_matches_array_element() {
        let single = r#"{"Name":"dotfiles","Path":"/r/dotfiles","Behind":1}"#;
        let pair = r#"[{"Name":"dotfiles","Path":"/r/dotfiles","Behind":1},{"Name":"api","Path":"/r/api","Behind":4}]"#;
        let single = parse_scan_output(single).unwrap();
        let pair = parse_scan_output(pair).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0], pair[0]);
        assert_eq!(pair[1].delta, 4);
    }

    #[test]
    fn empty_payloads_and_zero_deltas_yield_no_repos() {
        assert!(parse_scan_output("").unwrap().is_empty());
        assert!(parse_scan_output("[]").unwrap().is_empty());
        let zero = r#"[{"Name":"clean","Path":"/r/clean","FilesChanged":0}]"#;
        assert!(parse_scan_output(zero).unwrap().is_empty());
        assert!(parse_scan_output("[{\"Name\":1}]").is_err());
    }

    #[test]
    fn rendered_output_parses_back() {
        let repos = vec![RepoStatus {
            name: "notes".into(),
            path: PathBuf::from("/r/notes"),
            delta: 3,
        }];
        let rendered = render_scan_output(ScanKind::Push, &repos);
        assert!(rendered.contains("\"FilesChanged\":3"));
        assert_eq!(parse_scan_output(&rendered).unwrap(), repos);
    }

    #[test]
    fn discovery_finds_only_git_directories_across_paths() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_repo(first.path(), "b-repo");
        make_repo(first.path(), "a-repo");
        fs::create_dir_all(first.path().join("plain-dir")).unwrap();
        make_repo(second.path(), "extra");
        let missing = first.path().join("does-not-exist");

        let found = discover_repositories(&[
            first.path().to_path_buf(),
            missing,
            second.path().to_path_buf(),
        ]);
        let names: Vec<_> = found
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a-repo", "b-repo", "extra"]);
        assert_eq!(
            count_repositories(
                &[first.path().to_path_buf()],
                Duration::from_secs(5),
                count_discovered
            ),
            2
        );
    }

    #[test]
    fn pull_scan_reports_only_repos_behind() {
        let root = TempDir::new().unwrap();
        let dotfiles = make_repo(root.path(), "dotfiles");
        let synced = make_repo(root.path(), "synced");
        let no_upstream = make_repo(root.path(), "local-only");
        let executor = ScriptedExecutor::new()
            .on(&key(&dotfiles), "fetch", CommandOutput::ok(""))
            .on(&key(&dotfiles), "rev-parse", CommandOutput::ok("origin/main\n"))
            .on(&key(&dotfiles), "rev-list", CommandOutput::ok("1\n"))
            .on(&key(&synced), "fetch", CommandOutput::ok(""))
            .on(&key(&synced), "rev-parse", CommandOutput::ok("origin/main\n"))
            .on(&key(&synced), "rev-list", CommandOutput::ok("0\n"))
            .on(&key(&no_upstream), "fetch", CommandOutput::ok(""))
            .on(
                &key(&no_upstream),
                "rev-parse",
                CommandOutput::failed(128, "fatal: no upstream configured"),
            );
        let task = ScanTask::pull(ScanSettings::new(vec![root.path().to_path_buf()]));

        let events = run_scan(&task, &executor);
        assert_eq!(events[0], TaskEvent::Progress { current: 0, total: 3 });
        let result = finished(&events);
        assert_eq!(
            result.repos,
            vec![RepoStatus {
                name: "dotfiles".into(),
                path: dotfiles.clone(),
                delta: 1,
            }]
        );
    }

    #[test]
    fn push_scan_counts_changed_files_and_is_repeatable() {
        let root = TempDir::new().unwrap();
        let notes = make_repo(root.path(), "notes");
        let clean = make_repo(root.path(), "clean");
        let executor = ScriptedExecutor::new()
            .on(
                &key(&notes),
                "status",
                CommandOutput::ok("## main...origin/main\n M a.txt\n?? b.txt\n"),
            )
            .on(&key(&clean), "status", CommandOutput::ok("## main...origin/main\n"));
        let task = ScanTask::push(ScanSettings::new(vec![root.path().to_path_buf()]));

        let first = finished(&run_scan(&task, &executor));
        let second = finished(&run_scan(&task, &executor));
        assert_eq!(first.repos.len(), 1);
        assert_eq!(first.repos[0].name, "notes");
        assert_eq!(first.repos[0].delta, 2);
        assert_eq!(first.repos, second.repos);
    }

    #[test]
    fn scan_timeout_yields_failed_result() {
        let root = TempDir::new().unwrap();
        let slow = make_repo(root.path(), "slow");
        let executor = ScriptedExecutor::new().on_timeout(&key(&slow), "status");
        let task = ScanTask::push(ScanSettings::new(vec![root.path().to_path_buf()]));

        let events = run_scan(&task, &executor);
        assert!(events.iter().any(|event| matches!(event, TaskEvent::Error { .. })));
        let result = finished(&events);
        assert!(result.repos.is_empty());
        assert_eq!(result.error.as_deref(), Some("Timeout"));
    }

    fn stalled_count(_scan_paths: &[PathBuf]) -> usize {
        thread::sleep(Duration::from_millis(500));
        99
    }

    fn panicking_count(_scan_paths: &[PathBuf]) -> usize {
        panic!("count failed")
    }

    #[test]
    fn count_failures_report_zero() {
        let started = Instant::now();
        assert_eq!(count_repositories(&[], Duration::from_millis(50), stalled_count), 0);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(count_repositories(&[], Duration::from_secs(5), panicking_count), 0);
    }

    #[test]
    fn timed_out_count_still_runs_the_delta_scan() {
        let root = TempDir::new().unwrap();
        let notes = make_repo(root.path(), "notes");
        let executor =
            ScriptedExecutor::new().on(&key(&notes), "status", CommandOutput::ok(" M a.txt\n"));
        let mut settings = ScanSettings::new(vec![root.path().to_path_buf()]);
        settings.count_timeout = Duration::from_millis(50);
        let task = ScanTask::push(settings).with_counter(stalled_count);

        let events = run_scan(&task, &executor);
        assert_eq!(events[0], TaskEvent::Progress { current: 0, total: 0 });
        let result = finished(&events);
        assert!(!result.is_failed());
        assert_eq!(result.repos.len(), 1);
        assert_eq!(result.repos[0].name, "notes");
    }

    #[test]
    fn empty_scan_paths_finish_with_no_repos() {
        let root = TempDir::new().unwrap();
        let task = ScanTask::pull(ScanSettings::new(vec![root.path().to_path_buf()]));
        let events = run_scan(&task, &ScriptedExecutor::new());
        assert_eq!(events[0], TaskEvent::Progress { current: 0, total: 0 });
        let result = finished(&events);
        assert!(result.repos.is_empty());
        assert!(!result.is_failed());
    }
}
