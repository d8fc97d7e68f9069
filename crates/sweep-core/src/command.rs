use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared cancellation flag. Once set it stays set for the lifetime of the run.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub no_window: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            no_window: false,
        }
    }

    /// `git -C <repo> <args>` with a stable message locale and prompts disabled.
    pub fn git<I, S>(repo: &Path, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut spec = Self::new("git")
            .arg("-C")
            .arg(repo.to_string_lossy())
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0");
        for arg in args {
            spec = spec.arg(arg.as_ref().to_string_lossy());
        }
        spec
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn no_window(mut self, no_window: bool) -> Self {
        self.no_window = no_window;
        self
    }

    /// Arguments after the `-C <repo>` prefix of a git command.
    pub fn git_args(&self) -> &[String] {
        if self.program == "git" && self.args.first().map(String::as_str) == Some("-C") {
            &self.args[2.min(self.args.len())..]
        } else {
            &self.args
        }
    }

    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, the way `2>&1` would interleave them for git.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.stdout.trim().to_string(),
            (true, false) => self.stderr.trim().to_string(),
            (false, false) => format!("{}\n{}", self.stdout.trim(), self.stderr.trim()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Timeout: command exceeded {}s", .after.as_secs())]
    Timeout { after: Duration },
    #[error("cancelled")]
    Cancelled,
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("command i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Runs one external command to completion, bounded by `timeout`.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationFlag,
    ) -> Result<CommandOutput, ExecError>;
}

/// `std::process` backed executor. Kills the child on timeout and on cancellation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationFlag,
    ) -> Result<CommandOutput, ExecError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = spec.cwd.as_ref() {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        apply_window_hint(&mut command, spec.no_window);

        debug!(command = %spec.display(), timeout_secs = timeout.as_secs(), "spawning command");
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                kill_child(&mut child, spec);
                return Err(ExecError::Cancelled);
            }
            if started.elapsed() >= timeout {
                kill_child(&mut child, spec);
                warn!(command = %spec.display(), timeout_secs = timeout.as_secs(), "command timed out");
                return Err(ExecError::Timeout { after: timeout });
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill_child(child: &mut Child, spec: &CommandSpec) {
    if let Err(err) = child.kill() {
        warn!(command = %spec.display(), error = %err, "failed to kill command");
    }
    let _ = child.wait();
}

#[cfg(windows)]
fn apply_window_hint(command: &mut Command, no_window: bool) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    if no_window {
        command.creation_flags(CREATE_NO_WINDOW);
    }
}

#[cfg(not(windows))]
fn apply_window_hint(_command: &mut Command, _no_window: bool) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_spec_targets_repo_and_keeps_args() {
        let spec = CommandSpec::git(Path::new("/repos/dotfiles"), ["status", "--porcelain"]);
        assert_eq!(spec.program, "git");
        assert_eq!(spec.args[..2], ["-C".to_string(), "/repos/dotfiles".to_string()]);
        assert_eq!(spec.git_args(), ["status", "--porcelain"]);
        assert!(spec.env.iter().any(|(key, value)| key == "LC_ALL" && value == "C"));
    }

    #[test]
    fn combined_output_joins_streams() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: "Updating abc..def\n".into(),
            stderr: "error: boom\n".into(),
        };
        assert_eq!(output.combined(), "Updating abc..def\nerror: boom");
        assert_eq!(CommandOutput::failed(1, "x").combined(), "x");
    }

    #[cfg(unix)]
    #[test]
    fn process_executor_captures_streams() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2; exit 3");
        let output = ProcessExecutor::new()
            .execute(&spec, Duration::from_secs(10), &CancellationFlag::new())
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn process_executor_kills_on_timeout() {
        let spec = CommandSpec::new("sh").arg("-c").arg("sleep 5");
        let started = Instant::now();
        let err = ProcessExecutor::new()
            .execute(&spec, Duration::from_millis(200), &CancellationFlag::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn process_executor_kills_on_cancel() {
        let cancel = CancellationFlag::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let spec = CommandSpec::new("sh").arg("-c").arg("sleep 5");
        let err = ProcessExecutor::new()
            .execute(&spec, Duration::from_secs(10), &cancel)
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let spec = CommandSpec::new("definitely-not-a-real-program-xyz");
        let err = ProcessExecutor::new()
            .execute(&spec, Duration::from_secs(1), &CancellationFlag::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
