use super::*;
pub(super) fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let paths = AppPaths::resolve(cli.config.as_deref())?;
    info!(
        command = command_label(&cli.command),
        config = %paths.config.display(),
        "Running command"
    );

    match cli.command {
        Commands::Pull(args) => handle_pull(args, &paths),
        Commands::Push(args) => handle_push(args, &paths),
        Commands::Scan(args) => handle_scan(args, &paths),
        Commands::Config(args) => handle_config(args, &paths).map(|()| ExitCode::SUCCESS),
        Commands::Exclude(args) => handle_exclude(args, &paths).map(|()| ExitCode::SUCCESS),
        Commands::Paths(args) => handle_paths(args, &paths).map(|()| ExitCode::SUCCESS),
        Commands::Logs(args) => handle_logs(args, &paths).map(|()| ExitCode::SUCCESS),
    }
}

pub(super) fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Pull(_) => "pull",
        Commands::Push(_) => "push",
        Commands::Scan(_) => "scan",
        Commands::Config(_) => "config",
        Commands::Exclude(_) => "exclude",
        Commands::Paths(_) => "paths",
        Commands::Logs(_) => "logs",
    }
}
