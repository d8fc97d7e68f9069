use super::*;
#[derive(Parser)]
#[command(
    name = "git-sweep",
    author,
    version,
    about = "Pull or push every git repository under your scan paths"
)]
pub(super) struct Cli {
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Raise log verbosity (-v info, -vv debug)"
    )]
    pub(super) verbose: u8,
    #[arg(
        long,
        global = true,
        help = "Config file to use; stores and logs are kept beside it"
    )]
    pub(super) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(clap::Subcommand)]
pub(super) enum Commands {
    #[command(about = "Pull every repository that is behind its upstream")]
    Pull(PullArgs),
    #[command(about = "Commit and push every repository with local changes")]
    Push(PushArgs),
    #[command(about = "Scan only and report what a pull or push would touch")]
    Scan(ScanArgs),
    #[command(about = "Manage config")]
    Config(ConfigArgs),
    #[command(about = "Manage excluded repositories")]
    Exclude(ExcludeArgs),
    #[command(about = "Manage extra scan paths")]
    Paths(PathsArgs),
    #[command(about = "Manage operation logs")]
    Logs(LogsArgs),
}

#[derive(Parser)]
pub(super) struct PullArgs {
    #[arg(long, help = "Maximum number of repositories processed at once")]
    pub(super) jobs: Option<usize>,
    #[arg(long, help = "Print one line per repository after the run")]
    pub(super) status: bool,
    #[arg(long, help = "Never launch the merge tool on conflicts")]
    pub(super) non_interactive: bool,
}

#[derive(Parser)]
pub(super) struct PushArgs {
    #[arg(
        long,
        value_enum,
        help = "Action reported after the run; also picks the commit title prefix"
    )]
    pub(super) post_action: Option<PostActionValue>,
    #[arg(long, help = "Maximum number of repositories processed at once")]
    pub(super) jobs: Option<usize>,
    #[arg(long, help = "Print one line per repository after the run")]
    pub(super) status: bool,
    #[arg(long, help = "Skip excluded repositories without asking")]
    pub(super) non_interactive: bool,
}

#[derive(Parser)]
pub(super) struct ScanArgs {
    #[arg(long, value_enum)]
    pub(super) mode: ScanModeValue,
    #[arg(long, help = "Print the raw scan JSON")]
    pub(super) json: bool,
}

#[derive(Parser)]
pub(super) struct ConfigArgs {
    #[command(subcommand)]
    pub(super) command: ConfigCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum ConfigCommands {
    #[command(about = "Initialize config with the primary scan root")]
    Init(InitArgs),
    #[command(about = "Print the effective config")]
    Show,
    #[command(about = "Restore default settings, keeping the root")]
    Reset,
}

#[derive(Parser)]
pub(super) struct InitArgs {
    #[arg(long)]
    pub(super) root: PathBuf,
}

#[derive(Parser)]
pub(super) struct ExcludeArgs {
    #[command(subcommand)]
    pub(super) command: ExcludeCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum ExcludeCommands {
    #[command(about = "Exclude a repository by name")]
    Add(RepoNameArgs),
    #[command(about = "Stop excluding a repository")]
    Remove(RepoNameArgs),
    #[command(about = "List excluded repositories for this machine")]
    List,
}

#[derive(Parser)]
pub(super) struct RepoNameArgs {
    pub(super) name: String,
}

#[derive(Parser)]
pub(super) struct PathsArgs {
    #[command(subcommand)]
    pub(super) command: PathsCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum PathsCommands {
    #[command(about = "Add an extra scan path for this machine")]
    Add(ScanPathArgs),
    #[command(about = "Remove an extra scan path")]
    Remove(ScanPathArgs),
    #[command(about = "List every scan path, root first")]
    List,
}

#[derive(Parser)]
pub(super) struct ScanPathArgs {
    pub(super) path: PathBuf,
}

#[derive(Parser)]
pub(super) struct LogsArgs {
    #[command(subcommand)]
    pub(super) command: LogsCommands,
}

#[derive(clap::Subcommand)]
pub(super) enum LogsCommands {
    #[command(about = "Delete operation logs")]
    Clear(ClearLogsArgs),
}

#[derive(Parser)]
pub(super) struct ClearLogsArgs {
    #[arg(long, help = "Only delete logs older than this many days")]
    pub(super) days: Option<u32>,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub(super) enum PostActionValue {
    Shutdown,
    Restart,
    ShutdownCancel,
    RestartCancel,
    None,
}

impl From<PostActionValue> for PostAction {
    fn from(value: PostActionValue) -> Self {
        match value {
            PostActionValue::Shutdown => PostAction::Shutdown,
            PostActionValue::Restart => PostAction::Restart,
            PostActionValue::ShutdownCancel => PostAction::ShutdownCancel,
            PostActionValue::RestartCancel => PostAction::RestartCancel,
            PostActionValue::None => PostAction::None,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub(super) enum ScanModeValue {
    Pull,
    Push,
}

impl From<ScanModeValue> for ScanKind {
    fn from(value: ScanModeValue) -> Self {
        match value {
            ScanModeValue::Pull => ScanKind::Pull,
            ScanModeValue::Push => ScanKind::Push,
        }
    }
}
