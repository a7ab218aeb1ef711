//! Command implementations and the helpers they share

pub mod apply;
pub mod destroy;
pub mod plan;
pub mod providers;
pub mod state;

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use infragraph::{
    CancellationToken, Change, ChangeKind, ExecuteOptions, ExecuteSummary, FileStateStore, Phase,
    Plan, ProviderRegistry, RunResult,
};
use serde::Serialize;

use crate::Context;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::ui;

/// Config, providers and state store for one invocation
pub struct Session {
    pub config: Config,
    pub registry: ProviderRegistry,
    pub store: FileStateStore,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let config = match &ctx.config_path {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        let state_dir = match &ctx.state_dir {
            Some(dir) => dir.clone(),
            None => config.state_dir()?,
        };
        log::debug!("State directory: {}", state_dir.display());

        Ok(Self {
            config,
            registry: crate::providers::registry(),
            store: FileStateStore::new(state_dir),
        })
    }

    /// Execution options from flags, falling back to config
    pub fn execute_options(&self, args: &RunArgs) -> ExecuteOptions {
        let attempts = args.retries.map(|r| r.saturating_add(1));
        ExecuteOptions::default()
            .with_concurrency(self.config.jobs(args.jobs))
            .with_retry(self.config.retry.policy(attempts))
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

/// Confirm with user
pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?;

    Ok(confirmed)
}

/// Cancellation token tripped by Ctrl-C
///
/// Install after any prompt so Ctrl-C still aborts the prompt itself.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    let installed = ctrlc::set_handler(move || {
        if on_interrupt(&handler_token) {
            std::process::exit(130);
        }
    });
    if let Err(e) = installed {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }
    token
}

/// Cancel on the first interrupt; returns true when the process should exit
fn on_interrupt(token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return true;
    }
    ui::warn("Interrupted: letting running changes finish (Ctrl-C again to abort)");
    token.cancel();
    false
}

fn print_change(change: &Change, verbose: bool) {
    if change.kind == ChangeKind::NoOp {
        if verbose {
            ui::dim(&format!("    {} ({})", change.resource_id, change.provider_kind));
        }
        return;
    }

    let mut line = format!(
        "  {:>3} {} {}",
        ui::change_symbol(change.kind),
        change.resource_id.bold(),
        format!("({})", change.provider_kind).dimmed()
    );
    if change.phase == Phase::DestroyDeposed {
        let deposed = format!("[deposed {}]", change.instance_label());
        println!("{line} {}", deposed.magenta());
        return;
    }
    if change.kind == ChangeKind::Replace {
        let order = if change.create_before_destroy {
            "create before destroy"
        } else {
            "destroy then create"
        };
        line.push_str(&format!(" {}", format!("[{order}]").magenta()));
    }
    println!("{line}");

    if let (Some(before), Some(after)) = (change.before(), change.after.as_ref()) {
        for name in change.changed_properties() {
            let old = before.get(name).map_or_else(|| "(unset)".into(), ToString::to_string);
            let new = after.get(name).map_or_else(|| "(unset)".into(), ToString::to_string);
            println!("        {name}: {} → {}", old.red(), new.green());
        }
    }
}

/// Print a plan, one line per resource
pub fn print_plan(plan: &Plan, verbose: bool) {
    for change in plan.changes() {
        // The create half carries the line for a replacement
        if change.phase != Phase::DestroyReplaced {
            print_change(change, verbose);
        }
    }

    let s = plan.summary();
    println!();
    println!(
        "  {} {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        "Plan:".bold(),
        s.create.to_string().green(),
        s.update.to_string().yellow(),
        s.replace.to_string().magenta(),
        s.delete.to_string().red(),
        s.unchanged
    );
}

/// Print final summary
pub fn print_summary(summary: &ExecuteSummary, action: &str) {
    println!();
    if summary.is_success() {
        println!("  {} {action} complete", "✓".green().bold());
    } else {
        println!("  {} {action} finished with errors", "⚠".yellow().bold());
    }

    let lines = [
        (summary.created, "resource", "created"),
        (summary.updated, "resource", "updated"),
        (summary.replaced, "resource", "replaced"),
        (summary.deleted, "resource", "deleted"),
        (summary.skipped, "change", "skipped"),
    ];
    for (n, noun, verb) in lines {
        if n > 0 {
            println!("    • {} {verb}", ui::count(n, noun));
        }
    }
    if summary.failed > 0 {
        println!("    • {} {}", ui::count(summary.failed, "change"), "failed".red());
    }
}

/// Turn a non-successful run into an error for the exit code
pub fn check_run(result: &RunResult) -> Result<()> {
    if result.is_success() {
        return Ok(());
    }
    for failure in result.failures() {
        if let infragraph::Outcome::Failed { error } = &failure.outcome {
            ui::error(&format!("{}: {error}", failure.resource_id));
        }
    }
    anyhow::bail!("run finished with status {}", ui::run_status(result.status))
}
