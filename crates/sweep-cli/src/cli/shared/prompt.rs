use super::*;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use sweep_core::exclusion::{ExclusionChoice, ExclusionRequest};

/// Asks on the terminal what to do with excluded repositories.
///
/// One reader thread owns stdin; prompts take turns on its lines so concurrent
/// pushes never interleave answers.
pub(in crate::cli) struct StdinPrompt {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl StdinPrompt {
    pub(in crate::cli) fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("sweep-stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start stdin reader");
        }
        Self::from_lines(rx)
    }

    pub(in crate::cli) fn from_lines(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(lines)),
        }
    }
}

impl ExclusionPrompt for StdinPrompt {
    fn request(&self, request: ExclusionRequest, reply: mpsc::Sender<ExclusionChoice>) {
        let lines = Arc::clone(&self.lines);
        let spawned = thread::Builder::new()
            .name(format!("sweep-prompt-{}", request.repo_name))
            .spawn(move || {
                let Ok(lines) = lines.lock() else {
                    return;
                };
                if request.remaining().is_zero() {
                    let _ = reply.send(ExclusionChoice::Skip);
                    return;
                }
                while lines.try_recv().is_ok() {}
                eprint!(
                    "\n{} is excluded. [p]ush / [s]kip / [m]anual (skips in {}s): ",
                    request.repo_name,
                    request.remaining().as_secs().max(1)
                );
                let _ = io::stderr().flush();
                loop {
                    match lines.recv_timeout(request.remaining()) {
                        Ok(answer) => match parse_choice(&answer) {
                            Some(choice) => {
                                let _ = reply.send(choice);
                                return;
                            }
                            None => {
                                eprint!("Please answer p, s or m: ");
                                let _ = io::stderr().flush();
                            }
                        },
                        Err(RecvTimeoutError::Timeout) => {
                            eprintln!("no answer, skipping {}", request.repo_name);
                            let _ = reply.send(ExclusionChoice::Skip);
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start exclusion prompt");
        }
    }

    fn show_manual_instructions(&self, repo_name: &str, repo_path: &Path) {
        eprintln!(
            "Push {repo_name} yourself:\n  cd \"{}\"\n  git add -A\n  git commit\n  git push",
            repo_path.display()
        );
    }
}

pub(in crate::cli) fn parse_choice(answer: &str) -> Option<ExclusionChoice> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "p" | "push" => Some(ExclusionChoice::Push),
        "s" | "skip" | "" => Some(ExclusionChoice::Skip),
        "m" | "manual" => Some(ExclusionChoice::Manual),
        _ => None,
    }
}
