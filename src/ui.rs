use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use engine::{ChangeInfo, Status, Task};
use indicatif::{ProgressBar, ProgressStyle};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

pub fn status(status: Status) -> ColoredString {
    let text = status.as_str();
    match status {
        Status::Done => text.green(),
        Status::Error => text.red().bold(),
        Status::Abort | Status::Undone => text.yellow(),
        Status::Doing | Status::Undoing => text.cyan(),
        Status::Do | Status::Undo | Status::Hold => text.normal(),
    }
}

// ============================================================================
// Size Formatting
// ============================================================================

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Changes
// ============================================================================

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One line per change: id, status, spawn time, summary
pub fn change_table(changes: &[ChangeInfo]) {
    if changes.is_empty() {
        dim("no changes");
        return;
    }
    println!(
        "{:<4} {:<8} {:<20} {}",
        "ID".bold(),
        "Status".bold(),
        "Spawn".bold(),
        "Summary".bold()
    );
    for change in changes {
        println!(
            "{:<4} {:<8} {:<20} {}",
            change.id,
            status(change.status),
            local_time(change.spawn_time),
            change.summary
        );
    }
}

fn task_line(task: &Task) -> String {
    let progress = if task.progress.total > 0 && task.status == Status::Doing {
        format!(
            " ({}/{})",
            format_size(task.progress.done),
            format_size(task.progress.total)
        )
    } else {
        String::new()
    };
    format!("{:<8} {}{progress}", status(task.status), task.summary)
}

/// Full view of one change with its tasks and their logs
pub fn change_detail(change: &ChangeInfo) {
    header(&format!("Change {}: {}", change.id, change.summary));
    kv("kind", &change.kind);
    kv("status", &status(change.status).to_string());
    kv("spawned", &local_time(change.spawn_time));
    if let Some(ready) = change.ready_time {
        kv("ready", &local_time(ready));
    }
    println!();
    for task in &change.tasks {
        println!("  {}", task_line(task));
        for entry in &task.log {
            dim(&format!("    {entry}"));
        }
    }
    if let Some(err) = &change.err {
        println!();
        error(err);
    }
}

/// Progress bar following a change until it is ready
///
/// Position counts terminal tasks; the message shows the running task and
/// its byte progress when the backend reports any.
pub struct ChangeBar {
    bar: ProgressBar,
}

impl ChangeBar {
    pub fn new(change: &ChangeInfo) -> Self {
        let bar = ProgressBar::new(change.tasks.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }

    pub fn update(&self, change: &ChangeInfo) {
        let finished = change.tasks.iter().filter(|t| t.status.is_ready()).count();
        self.bar.set_position(finished as u64);
        let current = change
            .tasks
            .iter()
            .find(|t| matches!(t.status, Status::Doing | Status::Undoing));
        if let Some(task) = current {
            self.bar.set_message(task_line(task));
        }
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}
