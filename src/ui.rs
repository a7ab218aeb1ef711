use colored::{ColoredString, Colorize};
use infragraph::{ChangeKind, Outcome, RunStatus};

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

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Plan symbol for a change kind, colored by severity
pub fn change_symbol(kind: ChangeKind) -> ColoredString {
    let s = kind.symbol();
    match kind {
        ChangeKind::Create => s.green(),
        ChangeKind::Update => s.yellow(),
        ChangeKind::Replace => s.magenta(),
        ChangeKind::Delete => s.red(),
        ChangeKind::NoOp => s.dimmed(),
    }
}

/// Single-character mark for a change outcome
pub fn outcome_mark(outcome: &Outcome) -> ColoredString {
    match outcome {
        Outcome::Succeeded => "✓".green(),
        Outcome::NoOp => "○".dimmed(),
        Outcome::Failed { .. } => "✗".red(),
        Outcome::Skipped { .. } => "⊘".yellow(),
    }
}

/// Run status as a word
pub fn run_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Success => "success".green(),
        RunStatus::Failed => "failed".red(),
        RunStatus::Cancelled => "cancelled".yellow(),
    }
}

/// `1 resource`, `3 resources`
pub fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}
