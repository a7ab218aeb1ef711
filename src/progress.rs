//! Progress bar for apply and destroy runs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use infragraph::{Change, ChangeKind, Outcome, Phase, ProgressCallback, RunResult};

use crate::ui;

/// Reports each change as it starts and finishes
pub struct RunProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl RunProgress {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar, verbose }
    }

    /// Progress reporter that prints nothing (quiet or JSON output)
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose: false,
        }
    }
}

fn label(change: &Change) -> String {
    match change.phase {
        Phase::Single => format!("{} {}", change.kind.symbol(), change.resource_id),
        Phase::CreateReplacement => format!("+ {} (replacement)", change.resource_id),
        Phase::DestroyReplaced => format!("- {} (old instance)", change.resource_id),
        Phase::DestroyDeposed => format!(
            "- {} (deposed {})",
            change.resource_id,
            change.instance_label()
        ),
    }
}

impl ProgressCallback for RunProgress {
    fn on_run_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_change_start(&mut self, change: &Change) {
        self.bar.set_message(label(change));
    }

    fn on_change_complete(&mut self, change: &Change, outcome: &Outcome) {
        self.bar.inc(1);
        let mark = ui::outcome_mark(outcome);
        let line = match outcome {
            Outcome::Succeeded => format!("    {mark} {}", label(change)),
            Outcome::NoOp if self.verbose => format!("    {mark} {}", change.resource_id),
            Outcome::NoOp => return,
            Outcome::Failed { error } => format!("    {mark} {}: {}", label(change), error.red()),
            Outcome::Skipped { reason } if self.verbose || change.kind != ChangeKind::NoOp => {
                format!("    {mark} {} ({reason})", label(change))
            }
            Outcome::Skipped { .. } => return,
        };
        self.bar.println(line);
    }

    fn on_run_complete(&mut self, _result: &RunResult) {
        self.bar.finish_and_clear();
    }
}
