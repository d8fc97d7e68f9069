use super::*;

mod io_render;
mod prompt;

pub(in crate::cli) use io_render::*;
pub(in crate::cli) use prompt::*;

pub(in crate::cli) fn stdin_is_tty() -> bool {
    io::stdin().is_terminal()
}

pub(in crate::cli) fn stdout_is_tty() -> bool {
    io::stdout().is_terminal()
}
