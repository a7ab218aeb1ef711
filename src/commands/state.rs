use anyhow::{Result, bail};
use colored::Colorize;
use infragraph::StateStore;

use crate::Context;
use crate::cli::StateCommand;
use crate::commands::{Session, confirm, print_json};
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let session = Session::open(ctx)?;
    match cmd {
        StateCommand::List { json } => list(&session, json),
        StateCommand::Show { id, json } => show(&session, &id, json),
        StateCommand::Rm { id, yes } => remove(&session, &id, yes),
    }
}

fn list(session: &Session, json: bool) -> Result<()> {
    let records = session.store.load()?;
    if json {
        return print_json(&records);
    }

    ui::header(&format!("State ({})", session.store.dir().display()));
    if records.is_empty() {
        ui::dim("No resources recorded");
        return Ok(());
    }

    let width = records.keys().map(String::len).max().unwrap_or(0);
    for (id, record) in &records {
        println!(
            "  {:<width$}  {:<20} {}",
            id.bold(),
            record.kind,
            record.handle.as_deref().unwrap_or("-").dimmed()
        );
    }
    println!();
    ui::dim(&format!("{} resources", records.len()));
    Ok(())
}

fn show(session: &Session, id: &str, json: bool) -> Result<()> {
    let Some(record) = session.store.get(id)? else {
        bail!("No state recorded for '{id}'");
    };
    if json {
        return print_json(&record);
    }

    ui::header(id);
    ui::kv("kind", &record.kind);
    ui::kv("handle", record.handle.as_deref().unwrap_or("-"));
    ui::kv("applied", &record.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    if !record.dependencies.is_empty() {
        ui::kv("depends on", &record.dependencies.join(", "));
    }

    ui::section("Properties");
    for (name, value) in &record.properties {
        ui::kv(name, &value.to_string());
    }

    if !record.outputs.is_empty() {
        ui::section("Outputs");
        for (name, value) in &record.outputs {
            ui::kv(name, &value.to_string());
        }
    }

    if !record.deposed.is_empty() {
        ui::section("Deposed (destroyed on next apply)");
        for instance in &record.deposed {
            ui::kv(
                instance.handle.as_deref().unwrap_or("-"),
                &instance.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            );
        }
    }
    Ok(())
}

fn remove(session: &Session, id: &str, yes: bool) -> Result<()> {
    let records = session.store.load()?;
    let Some(record) = records.get(id) else {
        bail!("No state recorded for '{id}'");
    };

    ui::warn(&format!(
        "Forgetting {id} ({}) does not destroy it; the instance keeps running unmanaged.",
        record.kind
    ));
    if !yes && !confirm(&format!("Remove {id} from state?"), false)? {
        ui::info("Cancelled");
        return Ok(());
    }

    session.store.remove(id)?;
    ui::success(&format!("Removed {id} from state"));
    Ok(())
}
