use super::*;
pub(in crate::cli) fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    if total == 0 || width == 0 {
        return "[]".to_string();
    }
    let filled = ((step as f32 / total as f32) * width as f32).round() as usize;
    let filled = filled.min(width);
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(empty))
}

/// Single status line rewritten in place on a terminal, plain lines otherwise.
pub(in crate::cli) struct ProgressLine {
    label: &'static str,
    last_len: usize,
    in_place: bool,
}

impl ProgressLine {
    pub(in crate::cli) fn new(label: &'static str, in_place: bool) -> Self {
        Self {
            label,
            last_len: 0,
            in_place,
        }
    }

    pub(in crate::cli) fn render<R: Outcome>(&mut self, event: &RunEvent<'_, R>) {
        match event {
            RunEvent::ScanProgress { total, .. } => {
                self.show(&format!("{} scanning {total} repositories", self.label));
            }
            RunEvent::ScanFinished(scan) => {
                self.show(&format!(
                    "{} scan found {} repositories in {}",
                    self.label,
                    scan.repos.len(),
                    format_duration(scan.duration)
                ));
            }
            RunEvent::ScanFailed { message } => {
                self.clear();
                eprintln!("{} scan failed: {message}", self.label);
            }
            RunEvent::NothingToDo => {
                self.clear();
                println!("Nothing to {}: every repository is in sync.", self.label);
            }
            RunEvent::TaskError { label, message } => {
                self.clear();
                eprintln!("error: {label}: {message}");
            }
            RunEvent::Conflict { repo_name, repo_path } => {
                self.clear();
                println!(
                    "Merge conflict in {repo_name} ({})",
                    repo_path.display()
                );
            }
            RunEvent::RepoFinished {
                result,
                counters,
                total,
            } => {
                let line = format!(
                    "{} {}/{} {} ok={} failed={} skipped={} {}={}",
                    self.label,
                    counters.completed,
                    total,
                    render_progress_bar(counters.completed, *total, 20),
                    counters.success,
                    counters.failed,
                    counters.skipped,
                    result.repo_name(),
                    result.status()
                );
                self.show(&line);
            }
            RunEvent::PhaseComplete { .. } => self.finish(),
        }
    }

    pub(in crate::cli) fn finish(&mut self) {
        if self.in_place && self.last_len > 0 {
            println!();
        }
        self.last_len = 0;
    }

    fn show(&mut self, line: &str) {
        if !self.in_place {
            println!("{line}");
            return;
        }
        let width = line.chars().count();
        let pad = self.last_len.saturating_sub(width);
        print!("\r{line}{}", " ".repeat(pad));
        let _ = io::stdout().flush();
        self.last_len = width;
    }

    fn clear(&mut self) {
        if self.in_place && self.last_len > 0 {
            print!("\r{}\r", " ".repeat(self.last_len));
            let _ = io::stdout().flush();
        }
        self.last_len = 0;
    }
}

pub(in crate::cli) fn summary_line(
    label: &str,
    counters: &RunCounters,
    elapsed: Duration,
) -> String {
    format!(
        "{label} finished in {}: {} repositories, {} succeeded, {} failed, {} skipped",
        format_duration(elapsed),
        counters.completed,
        counters.success,
        counters.failed,
        counters.skipped
    )
}

/// One row per result, or only the noteworthy ones unless `all` is set.
pub(in crate::cli) fn result_rows<R: Outcome>(
    results: &[R],
    all: bool,
    detail: impl Fn(&R) -> String,
) -> Vec<String> {
    let mut rows: Vec<&R> = results
        .iter()
        .filter(|result| all || result.status() != StatusCode::Success)
        .collect();
    rows.sort_by(|a, b| a.repo_name().cmp(b.repo_name()));
    rows.into_iter()
        .map(|result| {
            let detail = detail(result);
            if detail.is_empty() {
                format!("{:<9} {}", result.status().as_str(), result.repo_name())
            } else {
                format!("{:<9} {} | {detail}", result.status().as_str(), result.repo_name())
            }
        })
        .collect()
}

pub(in crate::cli) fn print_summary<R: Outcome>(
    label: &str,
    summary: &RunSummary<R>,
    elapsed: Duration,
    all: bool,
    detail: impl Fn(&R) -> String,
) {
    if summary.cancelled {
        println!("{label} cancelled after {}", format_duration(elapsed));
    } else if let Some(message) = summary.scan.error.as_deref() {
        println!("{label} scan failed after {}: {message}", format_duration(elapsed));
    } else {
        println!("{}", summary_line(label, &summary.counters, elapsed));
    }
    for row in result_rows(&summary.results, all, detail) {
        println!("  {row}");
    }
}

pub(in crate::cli) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let whole = duration.as_secs();
        format!("{}m{:02}s", whole / 60, whole % 60)
    }
}

pub(in crate::cli) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
