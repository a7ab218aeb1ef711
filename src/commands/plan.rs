use anyhow::Result;
use infragraph::EngineContext;

use crate::Context;
use crate::cli::PlanArgs;
use crate::commands::{Session, print_json, print_plan};
use crate::stack::Stack;
use crate::ui;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let mut stack = Stack::load(&args.stack)?;

    let engine = EngineContext::new(&session.registry, &session.store);
    let plan = infragraph::plan(&engine, &mut stack.graph)?;

    if args.json {
        return print_json(&plan);
    }

    // Plain rendering for scripts and logs
    if ctx.quiet {
        println!("{plan}");
        return Ok(());
    }

    ui::header(&format!("Plan: {}", stack.name));
    if !plan.has_changes() {
        ui::success("No changes. Infrastructure matches the stack.");
        return Ok(());
    }

    print_plan(&plan, ctx.verbose > 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_quiet_plan_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context {
            verbose: 0,
            quiet: true,
            config_path: Some(dir.path().join("skyform.toml")),
            state_dir: Some(dir.path().join("state")),
        };
        let args = PlanArgs {
            stack: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/ecs-fargate.toml"),
            json: false,
        };

        run(&ctx, &args).unwrap();
        assert!(!dir.path().join("state").exists());
    }
}
