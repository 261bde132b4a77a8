//! `kiln test` command
//!
//! Runs a recipe's acceptance test against a prefix installed earlier.

use std::path::Path;

use anyhow::{Context, Result};

use super::{context, ShellReporter};
use crate::cli::TestArgs;
use crate::GlobalOptions;
use kiln::builder::Relocations;
use kiln::core::Recipe;
use kiln::ops::{format_report, run_acceptance, AcceptanceOptions, Receipt};
use kiln::util::Status;

pub fn execute(args: TestArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = &global_opts.shell;
    let ctx = context(shell)?;

    let recipe = Recipe::load(&args.recipe)?;
    let spec = recipe
        .test
        .as_ref()
        .with_context(|| format!("recipe `{}` has no [test] section", recipe.name))?;

    let prefix = args
        .prefix
        .unwrap_or_else(|| ctx.default_prefix(&recipe.name, &recipe.pkg_version()));
    if !prefix.is_dir() {
        anyhow::bail!(
            "{} is not installed at {}\n\
             hint: run `kiln install {}` first",
            recipe.name,
            prefix.display(),
            args.recipe.display()
        );
    }

    // Prefer what the install actually did over what the recipe says now.
    let relocations = match Receipt::load(&prefix)? {
        Some(receipt) => receipt.relocations,
        None => Relocations::plan(recipe.relocate.as_ref(), &args.platform.resolve()),
    };
    let binary = prefix.join(relocations.resolve(Path::new(&spec.binary)));

    let test_config = &ctx.config().test;
    let options = AcceptanceOptions {
        prefix: prefix.clone(),
        testpath: args.testpath,
        probe_timeout: test_config.probe_timeout(),
        probe_interval: test_config.probe_interval(),
        command_timeout: test_config.command_timeout(),
    };

    shell.status(Status::Testing, binary.display());
    let reporter = ShellReporter::new(shell);
    let report = run_acceptance(&binary, spec, &options, &reporter)?;

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "test-report",
            "report": report,
        }));
        return Ok(());
    }

    print!("{}", format_report(&report, shell.is_verbose()));
    shell.status(Status::Passed, format!("{} acceptance test", recipe.name));
    Ok(())
}
