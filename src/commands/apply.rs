use anyhow::Result;
use colored::Colorize;
use infragraph::{EngineContext, StateStore};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::{
    Session, check_run, confirm, interrupt_token, print_json, print_plan, print_summary,
};
use crate::progress::RunProgress;
use crate::stack::Stack;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let mut stack = Stack::load(&args.stack)?;
    let options = session.execute_options(&args.run);
    let engine = EngineContext::new(&session.registry, &session.store);

    let plan = infragraph::plan(&engine, &mut stack.graph)?;
    let json = args.run.json;

    if !json {
        ui::header(&format!("Apply: {}", stack.name));
        if !plan.has_changes() {
            ui::success("No changes. Infrastructure matches the stack.");
            print_outputs(&session, &stack)?;
            return Ok(());
        }
        print_plan(&plan, ctx.verbose > 0);
        println!();

        if !args.run.yes && !confirm("Apply these changes?", true)? {
            ui::info("Cancelled");
            return Ok(());
        }
    }

    let engine = engine.with_cancellation(interrupt_token());
    log::info!(
        "Applying {} changes with {} workers",
        plan.len(),
        options.concurrency
    );

    let mut progress = if ctx.quiet || json {
        RunProgress::hidden()
    } else {
        RunProgress::new(ctx.verbose > 0)
    };
    let result = infragraph::execute(&engine, &plan, &options, &mut progress)?;
    stack.graph.record_outcomes(&plan, &result)?;

    if json {
        print_json(&result)?;
        return check_run(&result);
    }

    print_summary(&result.summary(), "Apply");
    if result.is_success() {
        print_outputs(&session, &stack)?;
    }
    check_run(&result)
}

fn print_outputs(session: &Session, stack: &Stack) -> Result<()> {
    if stack.outputs.is_empty() {
        return Ok(());
    }

    let values = stack.resolve_outputs(&session.store.load()?);
    ui::section("Outputs");
    for name in stack.outputs.keys() {
        match values.get(name) {
            Some(value) => ui::kv(name, &value.to_string()),
            None => ui::kv(name, &"(unknown)".dimmed().to_string()),
        }
    }
    Ok(())
}
