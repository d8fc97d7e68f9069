use crate::command::{CommandOutput, ExecError};
use crate::model::StatusCode;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON shape shared by pull and push operations. Absent fields default to empty and
/// an absent status reads as `ERROR`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OperationWire {
    pub status: StatusCode,
    pub repo_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflict_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub is_excluded: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl OperationWire {
    pub fn new(status: StatusCode, repo_name: &str) -> Self {
        Self {
            status,
            repo_name: repo_name.to_string(),
            ..Self::default()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn excluded(mut self) -> Self {
        self.is_excluded = true;
        self
    }

    pub fn parse(output: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(output)
    }

    /// Renders the wire JSON as the stdout of a successful script run.
    pub fn render(&self) -> Result<CommandOutput, ExecError> {
        let json = serde_json::to_string(self).map_err(io::Error::from)?;
        Ok(CommandOutput::ok(json))
    }
}

/// Why a repository can no longer be operated on, if it vanished since the scan.
pub fn missing_reason(repo_path: &Path) -> Option<&'static str> {
    if !repo_path.is_dir() {
        return Some("Repository path does not exist");
    }
    if !repo_path.join(".git").exists() {
        return Some("Repository metadata (.git) is missing");
    }
    None
}

/// Appends every `warning:` line git printed on either stream.
pub fn collect_warnings(output: &CommandOutput, warnings: &mut Vec<String>) {
    for line in output.stdout.lines().chain(output.stderr.lines()) {
        let line = line.trim();
        if line.to_ascii_lowercase().starts_with("warning:") {
            warnings.push(line.to_string());
        }
    }
}

pub fn porcelain_entries(porcelain: &str) -> impl Iterator<Item = (&str, &str)> {
    porcelain.lines().filter_map(|line| {
        if line.len() < 4 || line.starts_with("##") {
            return None;
        }
        let code = line.get(..2)?;
        let file = line.get(3..)?;
        Some((code, file))
    })
}

/// True when the porcelain status lists unmerged paths (`UU`, `AA` or `DD`).
pub fn has_unmerged_paths(porcelain: &str) -> bool {
    porcelain_entries(porcelain).any(|(code, _)| matches!(code, "UU" | "AA" | "DD"))
}
