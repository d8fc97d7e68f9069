use super::shared::{ProgressLine, StdinPrompt, print_summary, stdin_is_tty, stdout_is_tty};
use super::*;
use std::thread;
use sweep_core::scan::render_scan_output;

pub(super) fn handle_pull(args: PullArgs, paths: &AppPaths) -> anyhow::Result<ExitCode> {
    let Some(_lock) = acquire_run_lock(paths, "pull")? else {
        return Ok(ExitCode::FAILURE);
    };
    let config = AppConfig::load(&paths.config)?;
    let settings = run_settings(&config, paths, args.jobs)?;
    let exclusions = ExclusionStore::open(&paths.exclusions).snapshot()?;
    let orchestrator = Orchestrator::new(settings, Arc::new(ProcessExecutor::new()))
        .with_exclusions(Arc::new(exclusions))
        .with_operation_log(OperationLog::new(&paths.log_dir));
    let merge_tool = config
        .merge_tool
        .as_deref()
        .filter(|_| !args.non_interactive);

    let started = Instant::now();
    let mut progress = ProgressLine::new("pull", stdout_is_tty());
    let summary = orchestrator.pull(&mut |event| {
        progress.render(&event);
        if let (RunEvent::Conflict { repo_name, repo_path }, Some(tool)) = (&event, merge_tool) {
            launch_merge_tool(tool, repo_name, repo_path);
        }
    });
    progress.finish();

    print_summary("Pull", &summary, started.elapsed(), args.status, |result| {
        if result.conflict_files.is_empty() {
            result.error_message.clone()
        } else {
            format!(
                "{} ({})",
                result.error_message,
                result.conflict_files.join(", ")
            )
        }
    });
    Ok(exit_code(&summary))
}

pub(super) fn handle_push(args: PushArgs, paths: &AppPaths) -> anyhow::Result<ExitCode> {
    let Some(_lock) = acquire_run_lock(paths, "push")? else {
        return Ok(ExitCode::FAILURE);
    };
    let config = AppConfig::load(&paths.config)?;
    let settings = run_settings(&config, paths, args.jobs)?;
    let post_action = args
        .post_action
        .map(PostAction::from)
        .unwrap_or(config.git.default_post_action);
    let exclusions = ExclusionStore::open(&paths.exclusions).snapshot()?;
    let prompt: Arc<dyn ExclusionPrompt> = if args.non_interactive || !stdin_is_tty() {
        Arc::new(AutoSkipPrompt)
    } else {
        Arc::new(StdinPrompt::spawn())
    };
    let orchestrator = Orchestrator::new(settings, Arc::new(ProcessExecutor::new()))
        .with_exclusions(Arc::new(exclusions))
        .with_prompt(prompt)
        .with_operation_log(OperationLog::new(&paths.log_dir));

    let started = Instant::now();
    let mut progress = ProgressLine::new("push", stdout_is_tty());
    let summary = orchestrator.push(post_action, &mut |event| progress.render(&event));
    progress.finish();

    print_summary("Push", &summary, started.elapsed(), args.status, |result| {
        let mut parts = Vec::new();
        if !result.error_message.is_empty() {
            parts.push(result.error_message.clone());
        }
        if result.is_excluded {
            parts.push("excluded".to_string());
        }
        if !result.warnings.is_empty() {
            parts.push(format!("{} warnings", result.warnings.len()));
        }
        parts.join("; ")
    });
    println!(
        "Post action: {} (would run: {})",
        post_action,
        if summary.should_execute_post_action() {
            "yes"
        } else {
            "no"
        }
    );
    Ok(exit_code(&summary))
}

pub(super) fn handle_scan(args: ScanArgs, paths: &AppPaths) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(&paths.config)?;
    let settings = run_settings(&config, paths, None)?;
    let kind = ScanKind::from(args.mode);
    let orchestrator = Orchestrator::new(settings, Arc::new(ProcessExecutor::new()));

    let mut progress = ProgressLine::new("scan", stdout_is_tty() && !args.json);
    let scan = orchestrator.scan::<NoOutcome>(kind, &mut |event| {
        if !args.json {
            progress.render(&event);
        }
    });
    progress.finish();
    let Some(scan) = scan else {
        eprintln!("Scan did not complete");
        return Ok(ExitCode::FAILURE);
    };
    if let Some(message) = scan.error.as_deref() {
        if args.json {
            eprintln!("scan failed: {message}");
        }
        return Ok(ExitCode::FAILURE);
    }

    if args.json {
        println!("{}", render_scan_output(kind, &scan.repos));
        return Ok(ExitCode::SUCCESS);
    }
    if scan.repos.is_empty() {
        println!("Every repository is in sync.");
        return Ok(ExitCode::SUCCESS);
    }
    let column = match kind {
        ScanKind::Pull => "behind",
        ScanKind::Push => "changed",
    };
    let width = scan
        .repos
        .iter()
        .map(|repo| repo.name.chars().count())
        .max()
        .unwrap_or(0);
    for repo in &scan.repos {
        println!(
            "{:<width$}  {:>5} {column}  {}",
            repo.name,
            repo.delta,
            repo.path.display()
        );
    }
    println!(
        "{} repositories, {} {column} in total",
        scan.repos.len(),
        scan.total_delta()
    );
    Ok(ExitCode::SUCCESS)
}

/// Scans never finish a repository operation.
enum NoOutcome {}

impl Outcome for NoOutcome {
    fn status(&self) -> StatusCode {
        match *self {}
    }

    fn repo_name(&self) -> &str {
        match *self {}
    }
}

pub(super) fn run_settings(
    config: &AppConfig,
    paths: &AppPaths,
    jobs: Option<usize>,
) -> anyhow::Result<RunSettings> {
    let root = config
        .root
        .as_deref()
        .context("config missing root; run `git-sweep config init --root <path>`")?;
    let scan_paths = CustomPathsStore::open(&paths.custom_paths).all_scan_paths(root)?;
    let settings = config.run_settings(scan_paths);
    Ok(match jobs {
        Some(jobs) => settings.with_throttle(jobs),
        None => settings,
    })
}

fn acquire_run_lock(paths: &AppPaths, operation: &str) -> anyhow::Result<Option<RunLock>> {
    if let Some(lock) = RunLock::try_acquire(&paths.lock, operation)? {
        return Ok(Some(lock));
    }
    let holder = RunLock::holder(&paths.lock).unwrap_or_else(|| "unknown".to_string());
    eprintln!("Another run is in progress ({holder}); try again once it finishes.");
    Ok(None)
}

pub(super) fn launch_merge_tool(
    tool: &str,
    repo_name: &str,
    repo_path: &Path,
) -> Option<thread::JoinHandle<()>> {
    let mut child = match Command::new(tool).current_dir(repo_path).spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(repo = %repo_name, tool, error = %err, "failed to launch merge tool");
            return None;
        }
    };
    info!(repo = %repo_name, tool, pid = child.id(), "merge tool launched");
    let repo = repo_name.to_string();
    let reaper = thread::Builder::new()
        .name(format!("merge-tool-{repo_name}"))
        .spawn(move || match child.wait() {
            Ok(status) => info!(repo = %repo, %status, "merge tool exited"),
            Err(err) => warn!(repo = %repo, error = %err, "failed to wait for merge tool"),
        });
    match reaper {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(repo = %repo_name, error = %err, "failed to watch merge tool");
            None
        }
    }
}

pub(super) fn run_failed<R>(summary: &RunSummary<R>) -> bool {
    summary.cancelled || summary.scan_failed || summary.counters.failed > 0
}

fn exit_code<R>(summary: &RunSummary<R>) -> ExitCode {
    if run_failed(summary) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
