use anyhow::{Result, bail};
use colored::Colorize;
use infragraph::ProviderRegistry;

use crate::providers;
use crate::ui;

pub fn run(kind: Option<&str>) -> Result<()> {
    let registry = providers::registry();

    match kind {
        Some(kind) => {
            if !registry.kinds().any(|k| k == kind) {
                bail!("Unknown resource kind '{kind}' (see `skyform providers`)");
            }
            describe(&registry, kind)
        }
        None => {
            ui::header("Resource kinds");
            for kind in registry.kinds() {
                let provider = registry.resolve(kind)?;
                let count = provider.schema().map_or(0, |s| s.properties().count());
                let replace = if provider.create_before_destroy() {
                    " create-before-destroy".cyan().to_string()
                } else {
                    String::new()
                };
                println!("  {:<20} {}{replace}", kind.bold(), format!("{count} properties").dimmed());
            }
            Ok(())
        }
    }
}

fn describe(registry: &ProviderRegistry, kind: &str) -> Result<()> {
    let provider = registry.resolve(kind)?;
    ui::header(kind);
    if provider.create_before_destroy() {
        ui::dim("Replacements create the new instance before destroying the old one");
    }

    let Some(schema) = provider.schema() else {
        ui::dim("No declared properties");
        return Ok(());
    };

    for (name, spec) in schema.properties() {
        let mut flags = Vec::new();
        if spec.required {
            flags.push("required".yellow().to_string());
        }
        if spec.immutable {
            flags.push("forces replacement".magenta().to_string());
        }
        println!(
            "  {:<24} {:<8} {}",
            name,
            spec.ty.to_string().dimmed(),
            flags.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = run(Some("no_such_kind")).unwrap_err();
        assert!(err.to_string().contains("no_such_kind"));
    }

    #[test]
    fn test_every_kind_has_a_schema() {
        let registry = providers::registry();
        for kind in registry.kinds() {
            let provider = registry.resolve(kind).unwrap();
            assert!(provider.schema().is_some(), "{kind} has no schema");
        }
    }
}
