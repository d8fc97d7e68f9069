//! In-memory command executor for driving tasks deterministically in tests.

use crate::command::{CancellationFlag, CommandExecutor, CommandOutput, CommandSpec, ExecError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

enum Response {
    Output(CommandOutput),
    Timeout,
}

struct Rule {
    repo: String,
    prefix: String,
    responses: VecDeque<Response>,
}

/// Answers git commands by `(repo, argument prefix)`. Repeated registrations for the
/// same key queue up; the last response sticks.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    cancel_on: Mutex<Vec<(String, CancellationFlag)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, repo: &str, prefix: &str, output: CommandOutput) -> Self {
        self.push(repo, prefix, Response::Output(output));
        self
    }

    pub fn on_timeout(self, repo: &str, prefix: &str) -> Self {
        self.push(repo, prefix, Response::Timeout);
        self
    }

    /// Sets `flag` while a command starting with `prefix` runs.
    pub fn cancel_during(self, prefix: &str, flag: CancellationFlag) -> Self {
        self.cancel_on
            .lock()
            .unwrap()
            .push((prefix.to_string(), flag));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, repo: &str) -> Vec<String> {
        let prefix = format!("{repo}: ");
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    fn push(&self, repo: &str, prefix: &str, response: Response) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules
            .iter_mut()
            .find(|rule| rule.repo == repo && rule.prefix == prefix)
        {
            rule.responses.push_back(response);
            return;
        }
        rules.push(Rule {
            repo: repo.to_string(),
            prefix: prefix.to_string(),
            responses: VecDeque::from([response]),
        });
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        _cancel: &CancellationFlag,
    ) -> Result<CommandOutput, ExecError> {
        let repo = spec.args.get(1).cloned().unwrap_or_default();
        let args = spec.git_args().join(" ");
        self.calls.lock().unwrap().push(format!("{repo}: {args}"));

        for (prefix, flag) in self.cancel_on.lock().unwrap().iter() {
            if args.starts_with(prefix.as_str()) {
                flag.cancel();
            }
        }

        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .filter(|rule| rule.repo == repo && args.starts_with(rule.prefix.as_str()))
            .max_by_key(|rule| rule.prefix.len());
        let Some(rule) = rule else {
            return Ok(CommandOutput::failed(
                128,
                format!("fatal: unexpected command: {args}"),
            ));
        };
        let response = if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            None
        };
        let response = response.as_ref().or(rule.responses.front());
        match response {
            Some(Response::Output(output)) => Ok(output.clone()),
            Some(Response::Timeout) => Err(ExecError::Timeout { after: timeout }),
            None => Ok(CommandOutput::failed(128, "fatal: no response")),
        }
    }
}
