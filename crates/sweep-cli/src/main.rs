use std::process::ExitCode;

mod cli;
mod logging;

fn main() -> anyhow::Result<ExitCode> {
    cli::run()
}
