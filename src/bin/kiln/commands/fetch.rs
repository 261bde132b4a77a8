//! `kiln fetch` command

use anyhow::Result;

use super::{context, transport, ShellReporter};
use crate::cli::FetchArgs;
use crate::GlobalOptions;
use kiln::core::Recipe;
use kiln::ops::fetch_recipe;
use kiln::sources::Fetcher;
use kiln::util::Status;

pub fn execute(args: FetchArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = &global_opts.shell;
    let ctx = context(shell)?;
    let transport = transport(&ctx)?;

    let recipe = Recipe::load(&args.recipe)?;
    let platform = args.platform.resolve();
    let fetcher = Fetcher::new(&ctx.cache_dir(), &transport);
    let reporter = ShellReporter::new(shell);

    shell.status(
        Status::Fetching,
        format!("{} {} for {}", recipe.name, recipe.pkg_version(), platform),
    );
    let spinner = shell.spinner(Status::Fetching, &recipe.source.url);
    let fetched = fetch_recipe(&recipe, &platform, &fetcher, &reporter)?;
    spinner.finish();

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "fetch-report",
            "artifacts": fetched,
        }));
        return Ok(());
    }

    for artifact in &fetched {
        println!("{}", artifact.path.display());
    }
    shell.status(
        Status::Finished,
        format!("{} artifact(s) verified", fetched.len()),
    );

    Ok(())
}
