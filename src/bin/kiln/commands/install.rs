//! `kiln install` command

use anyhow::Result;

use super::{context, transport, ShellReporter};
use crate::cli::InstallArgs;
use crate::GlobalOptions;
use kiln::core::Recipe;
use kiln::ops::{install, InstallOptions};
use kiln::util::shell::format_duration;
use kiln::util::Status;

pub fn execute(args: InstallArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = &global_opts.shell;
    let ctx = context(shell)?;
    let transport = transport(&ctx)?;

    let recipe = Recipe::load(&args.recipe)?;
    let platform = args.platform.resolve();

    let options = InstallOptions {
        prefix: args.prefix,
        keep_work: args.keep_work,
        run_test: !args.no_test,
        jobs: args.jobs,
        make: args.make,
        platform: Some(platform),
    };

    let reporter = ShellReporter::new(shell);
    let report = install(&recipe, &options, &ctx, &transport, &reporter)?;

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "install-report",
            "report": report,
        }));
        return Ok(());
    }

    if let Some(ref test) = report.test {
        shell.status(
            Status::Passed,
            format!(
                "acceptance test ({} steps, {} bytes round-tripped)",
                test.steps.len(),
                test.bytes
            ),
        );
    }
    if let Some(ref dir) = report.work_dir {
        shell.status(Status::Info, format!("work directory kept at {}", dir.display()));
    }
    shell.status(
        Status::Installed,
        format!(
            "{} {} to {}",
            report.name,
            report.pkg_version,
            report.prefix.display()
        ),
    );
    if let Some(ref caveats) = report.caveats {
        shell.status(Status::Caveats, "");
        shell.block(caveats);
    }
    shell.status(
        Status::Finished,
        format!("in {}", format_duration(report.duration)),
    );

    Ok(())
}
