use anyhow::Result;
use infragraph::EngineContext;

use crate::Context;
use crate::cli::DestroyArgs;
use crate::commands::{
    Session, check_run, confirm, interrupt_token, print_json, print_plan, print_summary,
};
use crate::progress::RunProgress;
use crate::ui;

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let options = session.execute_options(&args.run);
    let engine = EngineContext::new(&session.registry, &session.store);

    let plan = infragraph::plan_destroy(&engine)?;
    let json = args.run.json;

    if !json {
        ui::header("Destroy");
        if plan.is_empty() {
            ui::success("Nothing to destroy. State is empty.");
            return Ok(());
        }
        print_plan(&plan, ctx.verbose > 0);
        println!();

        if !args.run.yes {
            ui::warn("This destroys every resource recorded in state.");
            if !confirm("Destroy all resources?", false)? {
                ui::info("Cancelled");
                return Ok(());
            }
        }
    }

    let engine = engine.with_cancellation(interrupt_token());
    let mut progress = if ctx.quiet || json {
        RunProgress::hidden()
    } else {
        RunProgress::new(ctx.verbose > 0)
    };
    let result = infragraph::execute(&engine, &plan, &options, &mut progress)?;

    if json {
        print_json(&result)?;
    } else {
        print_summary(&result.summary(), "Destroy");
    }
    check_run(&result)
}
