use crate::logging;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sweep_core::command::ProcessExecutor;
use sweep_core::config::{AppConfig, RunSettings};
use sweep_core::exclusion::{AutoSkipPrompt, ExclusionPrompt, ExclusionStore};
use sweep_core::lock::RunLock;
use sweep_core::model::{Outcome, PostAction, RunCounters, ScanKind, StatusCode};
use sweep_core::oplog::OperationLog;
use sweep_core::orchestrator::{Orchestrator, RunEvent, RunSummary};
use sweep_core::paths::AppPaths;
use sweep_core::scan_paths::CustomPathsStore;
use tracing::{info, warn};

mod app;
mod args;
mod config_cmd;
mod exclude_cmd;
mod logs_cmd;
mod paths_cmd;
mod run_cmd;
mod shared;

use args::*;

use config_cmd::handle_config;
use exclude_cmd::handle_exclude;
use logs_cmd::handle_logs;
use paths_cmd::handle_paths;
use run_cmd::{handle_pull, handle_push, handle_scan};

pub fn run() -> anyhow::Result<ExitCode> {
    app::run()
}
