use super::*;
pub(super) fn handle_logs(args: LogsArgs, paths: &AppPaths) -> anyhow::Result<()> {
    match args.command {
        LogsCommands::Clear(args) => {
            let log = OperationLog::new(&paths.log_dir);
            let stats = log.stats(args.days)?;
            let removed = log.clear(args.days)?;
            info!(removed, days = ?args.days, "operation logs cleared");
            println!(
                "Removed {removed} log files ({}) across {} repositories",
                super::shared::format_bytes(stats.bytes),
                stats.repos
            );
        }
    }
    Ok(())
}
