//! `kiln livecheck` command

use anyhow::Result;

use super::{context, transport};
use crate::cli::LivecheckArgs;
use crate::GlobalOptions;
use kiln::core::Recipe;
use kiln::ops::livecheck;
use kiln::util::Status;

pub fn execute(args: LivecheckArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = &global_opts.shell;
    let ctx = context(shell)?;
    let transport = transport(&ctx)?;

    let recipe = Recipe::load(&args.recipe)?;
    let report = livecheck(&recipe, &transport)?;

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "livecheck-report",
            "report": report,
        }));
        return Ok(());
    }

    if report.outdated {
        println!("{}: {} ==> {}", report.name, report.current, report.latest);
        shell.warn(format!("{} is outdated", report.name));
    } else {
        println!("{}: {} is up to date", report.name, report.current);
        shell.status(Status::Finished, "livecheck");
    }

    Ok(())
}
