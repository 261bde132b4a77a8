//! `kiln info` command
//!
//! Shows what a recipe does on a platform without building anything.

use anyhow::Result;

use super::context;
use crate::cli::InfoArgs;
use crate::GlobalOptions;
use kiln::builder::Relocations;
use kiln::core::Recipe;
use kiln::ops::Receipt;

pub fn execute(args: InfoArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = &global_opts.shell;
    let ctx = context(shell)?;

    let recipe = Recipe::load(&args.recipe)?;
    let platform = args.platform.resolve();
    let prefix = ctx.default_prefix(&recipe.name, &recipe.pkg_version());
    let installed = Receipt::load(&prefix)?;
    let relocations = Relocations::plan(recipe.relocate.as_ref(), &platform);

    let resources: Vec<&str> = recipe
        .active_resources(&platform)
        .map(|r| r.name.as_str())
        .collect();
    let patches: Vec<&str> = recipe
        .patches
        .iter()
        .filter(|p| p.when.matches(&platform))
        .map(|p| p.url.as_str())
        .collect();
    let bottle = platform
        .bottle_tag()
        .and_then(|tag| recipe.bottles.get(&tag).map(|sha| (tag, sha.clone())));

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "recipe-info",
            "name": recipe.name,
            "version": recipe.pkg_version(),
            "platform": platform,
            "resources": resources,
            "patches": patches,
            "configure_flags": recipe.configure_flags(&platform),
            "relocations": relocations,
            "bottle": bottle.as_ref().map(|(tag, sha)| serde_json::json!({ "tag": tag, "sha256": sha })),
            "installed": installed.is_some(),
        }));
        return Ok(());
    }

    println!("{} {}", recipe.name, recipe.pkg_version());
    if let Some(ref desc) = recipe.desc {
        println!("{}", desc);
    }
    if let Some(ref homepage) = recipe.homepage {
        println!("{}", homepage);
    }
    if let Some(ref license) = recipe.license {
        println!("License: {}", license);
    }
    println!();

    println!("Platform: {}", platform);
    if !recipe.depends_on.build.is_empty() {
        println!("Build dependencies: {}", recipe.depends_on.build.join(", "));
    }
    if !recipe.depends_on.runtime.is_empty() {
        println!("Runtime dependencies: {}", recipe.depends_on.runtime.join(", "));
    }
    print_list("Resources", &resources);
    print_list("Patches", &patches);
    print_list("Configure flags", &recipe.configure_flags(&platform));

    if !relocations.is_empty() {
        println!("Relocations:");
        for r in relocations.iter() {
            println!("  {} -> {}", r.from.display(), r.to.display());
        }
    }

    match bottle {
        Some((tag, sha)) => println!("Bottle: {} ({})", tag, sha),
        None => println!("Bottle: none for this platform"),
    }

    match installed {
        Some(receipt) => println!(
            "Installed: {} ({} on {})",
            prefix.display(),
            receipt.pkg_version,
            receipt.platform
        ),
        None => println!("Not installed"),
    }

    Ok(())
}

fn print_list(title: &str, items: &[&str]) {
    if items.is_empty() {
        println!("{}: none", title);
        return;
    }
    println!("{}:", title);
    for item in items {
        println!("  {}", item);
    }
}
