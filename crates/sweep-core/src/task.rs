//! Execution template shared by every scan and operation task.
//!
//! A task builds a [`Script`], the template runs it through a [`Shell`] bound to the
//! task timeout and the run's cancellation flag, then classifies the outcome into
//! exactly one `Finished` event. Cancellation observed before or after the command
//! suppresses every emission.

use crate::command::{CancellationFlag, CommandExecutor, CommandOutput, CommandSpec, ExecError};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const ERROR_DETAIL_LIMIT: usize = 200;

#[derive(Clone, Debug, PartialEq)]
pub enum TaskEvent<T> {
    Progress { current: usize, total: usize },
    Error { label: String, message: String },
    Conflict { repo_name: String, repo_path: PathBuf },
    Finished(T),
}

/// Safe emission gate. Becomes a no-op once cancellation is observed or the
/// receiving side has gone away.
pub struct Emitter<T> {
    tx: Sender<TaskEvent<T>>,
    cancel: CancellationFlag,
    open: AtomicBool,
}

impl<T> Emitter<T> {
    pub fn new(tx: Sender<TaskEvent<T>>, cancel: CancellationFlag) -> Self {
        Self {
            tx,
            cancel,
            open: AtomicBool::new(true),
        }
    }

    pub fn emit(&self, event: TaskEvent<T>) -> bool {
        if self.cancel.is_cancelled() || !self.open.load(Ordering::SeqCst) {
            return false;
        }
        if self.tx.send(event).is_err() {
            self.open.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}

/// Runs commands on behalf of one task.
///
/// Checks cancellation before and after every call and applies the task timeout to
/// each call, clamped to the optional phase deadline.
#[derive(Clone, Copy)]
pub struct Shell<'a> {
    executor: &'a dyn CommandExecutor,
    cancel: &'a CancellationFlag,
    timeout: Duration,
    deadline: Option<Instant>,
    no_window: bool,
}

impl<'a> Shell<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        cancel: &'a CancellationFlag,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            cancel,
            timeout,
            deadline: None,
            no_window: false,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_no_window(mut self, no_window: bool) -> Self {
        self.no_window = no_window;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        let timeout = self.call_timeout()?;
        let output = self.executor.execute(spec, timeout, self.cancel)?;
        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        Ok(output)
    }

    pub fn git<I, S>(&self, repo: &Path, args: I) -> Result<CommandOutput, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let spec = CommandSpec::git(repo, args).no_window(self.no_window);
        self.run(&spec)
    }

    fn call_timeout(&self) -> Result<Duration, ExecError> {
        let Some(deadline) = self.deadline else {
            return Ok(self.timeout);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecError::Timeout {
                after: self.timeout,
            });
        }
        Ok(remaining.min(self.timeout))
    }
}

/// What a task's `build_command` returns: one command or a multi-step procedure
/// whose stdout carries the task's wire output.
pub trait Script {
    fn run(&self, shell: &Shell<'_>) -> Result<CommandOutput, ExecError>;
}

impl Script for CommandSpec {
    fn run(&self, shell: &Shell<'_>) -> Result<CommandOutput, ExecError> {
        let spec = if shell.no_window && !self.no_window {
            self.clone().no_window(true)
        } else {
            self.clone()
        };
        shell.run(&spec)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Timeout: operation took too long")]
    Timeout,
    #[error("Failed to parse results: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Fault(String),
}

impl TaskError {
    /// Message handed to `Task::error_result`.
    pub fn result_message(&self) -> String {
        match self {
            TaskError::Timeout => "Timeout".to_string(),
            TaskError::Parse(_) => "Parse error".to_string(),
            TaskError::Fault(message) => message.clone(),
        }
    }
}

impl From<ExecError> for TaskError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout { .. } => TaskError::Timeout,
            other => TaskError::Fault(other.to_string()),
        }
    }
}

pub trait Task: Send {
    type Output: Send + 'static;
    type Command: Script;

    fn label(&self) -> String;
    fn timeout(&self) -> Duration;
    fn build_command(&self) -> Self::Command;
    fn parse_result(&self, output: &str, elapsed: Duration) -> Result<Self::Output, TaskError>;
    fn error_result(&self, message: &str, elapsed: Duration) -> Self::Output;

    fn use_no_window(&self) -> bool {
        false
    }

    /// Runs before the main command; scans count repositories here.
    fn prepare(&self, _shell: &Shell<'_>, _emitter: &Emitter<Self::Output>) {}

    /// Extra events derived from a parsed result, emitted before `Finished`.
    fn announce(&self, _result: &Self::Output, _emitter: &Emitter<Self::Output>) {}
}

/// Runs `task` and emits at most one `Finished` event.
///
/// Returns `true` when the terminal result was delivered.
pub fn run_task<T: Task>(
    task: &T,
    executor: &dyn CommandExecutor,
    cancel: &CancellationFlag,
    emitter: &Emitter<T::Output>,
) -> bool {
    let label = task.label();
    if cancel.is_cancelled() {
        debug!(task = %label, "cancelled before start");
        return false;
    }
    let started = Instant::now();
    let shell = Shell::new(executor, cancel, task.timeout()).with_no_window(task.use_no_window());

    task.prepare(&shell, emitter);
    if cancel.is_cancelled() {
        return false;
    }

    let command = task.build_command();
    let output = match command.run(&shell) {
        Ok(output) => output,
        Err(ExecError::Cancelled) => {
            debug!(task = %label, "cancelled while running; result discarded");
            return false;
        }
        Err(err) => {
            let err = TaskError::from(err);
            return finish_with_error(task, emitter, &label, &err, started.elapsed());
        }
    };
    let elapsed = started.elapsed();
    if cancel.is_cancelled() {
        debug!(task = %label, "cancelled after command; result discarded");
        return false;
    }

    if !output.success() {
        let detail = truncate_chars(output.stderr.trim(), ERROR_DETAIL_LIMIT);
        warn!(task = %label, exit_code = output.exit_code, stderr = %detail, "command failed");
        emitter.emit(TaskEvent::Error {
            label: label.clone(),
            message: format!("Command error: {detail}"),
        });
        return emitter.emit(TaskEvent::Finished(task.error_result("", elapsed)));
    }

    match task.parse_result(output.stdout.trim(), elapsed) {
        Ok(result) => {
            task.announce(&result, emitter);
            emitter.emit(TaskEvent::Finished(result))
        }
        Err(err) => finish_with_error(task, emitter, &label, &err, elapsed),
    }
}

fn finish_with_error<T: Task>(
    task: &T,
    emitter: &Emitter<T::Output>,
    label: &str,
    err: &TaskError,
    elapsed: Duration,
) -> bool {
    let message = match err {
        TaskError::Fault(text) => format!(
            "Unexpected error: {}",
            truncate_chars(text, ERROR_DETAIL_LIMIT)
        ),
        other => other.to_string(),
    };
    warn!(task = %label, error = %message, "task failed");
    emitter.emit(TaskEvent::Error {
        label: label.to_string(),
        message,
    });
    emitter.emit(TaskEvent::Finished(
        task.error_result(&err.result_message(), elapsed),
    ))
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;
    use std::sync::mpsc;

    struct EchoTask {
        spec: CommandSpec,
    }

    impl Task for EchoTask {
        type Output = String;
        type Command = CommandSpec;

        fn label(&self) -> String {
            "echo".into()
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        fn build_command(&self) -> CommandSpec {
            self.spec.clone()
        }

        fn parse_result(&self, output: &str, _elapsed: Duration) -> Result<String, TaskError> {
            let value: serde_json::Value = serde_json::from_str(output)?;
            Ok(value["msg"].as_str().unwrap_or_default().to_string())
        }

        fn error_result(&self, message: &str, _elapsed: Duration) -> String {
            format!("error:{message}")
        }
    }

    fn run(executor: &ScriptedExecutor, cancel: &CancellationFlag) -> Vec<TaskEvent<String>> {
        let (tx, rx) = mpsc::channel();
        let emitter = Emitter::new(tx, cancel.clone());
        let task = EchoTask {
            spec: CommandSpec::git(Path::new("/r"), ["echo"]),
        };
        run_task(&task, executor, cancel, &emitter);
        drop(emitter);
        rx.into_iter().collect()
    }

    #[test]
    fn success_emits_parsed_result_once() {
        let executor = ScriptedExecutor::new().on("/r", "echo", CommandOutput::ok(r#"{"msg":"hi"}"#));
        let events = run(&executor, &CancellationFlag::new());
        assert_eq!(events, vec![TaskEvent::Finished("hi".to_string())]);
    }

    #[test]
    fn nonzero_exit_emits_error_then_empty_error_result() {
        let long_stderr = "x".repeat(500);
        let executor = ScriptedExecutor::new().on("/r", "echo", CommandOutput::failed(1, long_stderr));
        let events = run(&executor, &CancellationFlag::new());
        assert_eq!(events.len(), 2);
        match &events[0] {
            TaskEvent::Error { message, .. } => {
                assert_eq!(message.len(), "Command error: ".len() + 200);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[1], TaskEvent::Finished("error:".to_string()));
    }

    #[test]
    fn timeout_and_parse_errors_are_classified() {
        let executor = ScriptedExecutor::new().on_timeout("/r", "echo");
        let events = run(&executor, &CancellationFlag::new());
        assert_eq!(events.last(), Some(&TaskEvent::Finished("error:Timeout".into())));

        let executor = ScriptedExecutor::new().on("/r", "echo", CommandOutput::ok("{not json"));
        let events = run(&executor, &CancellationFlag::new());
        assert_eq!(
            events.last(),
            Some(&TaskEvent::Finished("error:Parse error".into()))
        );
    }

    #[test]
    fn cancellation_before_start_emits_nothing() {
        let executor = ScriptedExecutor::new().on("/r", "echo", CommandOutput::ok(r#"{"msg":"hi"}"#));
        let cancel = CancellationFlag::new();
        cancel.cancel();
        assert!(run(&executor, &cancel).is_empty());
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn cancellation_during_command_discards_result() {
        let cancel = CancellationFlag::new();
        let executor = ScriptedExecutor::new()
            .on("/r", "echo", CommandOutput::ok(r#"{"msg":"hi"}"#))
            .cancel_during("echo", cancel.clone());
        assert!(run(&executor, &cancel).is_empty());
        assert_eq!(executor.calls().len(), 1);
    }

    #[test]
    fn emitter_closes_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel::<TaskEvent<String>>();
        let emitter = Emitter::new(tx, CancellationFlag::new());
        drop(rx);
        assert!(!emitter.emit(TaskEvent::Progress { current: 0, total: 1 }));
        assert!(!emitter.is_open());
    }

    #[test]
    fn deadline_in_the_past_times_out_without_running() {
        let executor = ScriptedExecutor::new().on("/r", "status", CommandOutput::ok(""));
        let cancel = CancellationFlag::new();
        let shell = Shell::new(&executor, &cancel, Duration::from_secs(5))
            .with_deadline(Instant::now() - Duration::from_millis(1));
        let err = shell.git(Path::new("/r"), ["status"]).unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(executor.calls().is_empty());
    }
}
