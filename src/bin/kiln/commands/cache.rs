//! `kiln cache` command
//!
//! Inspect and clean the download cache.

use anyhow::Result;

use super::{context, format_size};
use crate::cli::{CacheArgs, CacheCommands};
use crate::GlobalOptions;
use kiln::sources::DownloadCache;
use kiln::util::Status;

pub fn execute(args: CacheArgs, global_opts: &GlobalOptions) -> Result<()> {
    let shell = &global_opts.shell;
    let ctx = context(shell)?;
    let cache = DownloadCache::new(&ctx.cache_dir());

    match args.command {
        CacheCommands::Path => {
            println!("{}", cache.root().display());
        }
        CacheCommands::List => {
            let entries = cache.entries()?;
            if shell.is_json() {
                shell.json_event(&serde_json::json!({
                    "reason": "cache-list",
                    "entries": entries,
                }));
                return Ok(());
            }

            if entries.is_empty() {
                println!("(empty)");
                return Ok(());
            }
            let mut total = 0;
            for entry in &entries {
                total += entry.size;
                println!(
                    "{}  {}  ({})",
                    &entry.sha256[..12.min(entry.sha256.len())],
                    entry.filename,
                    format_size(entry.size)
                );
            }
            println!("{} file(s), {}", entries.len(), format_size(total));
        }
        CacheCommands::Clean => {
            let freed = cache.clean()?;
            shell.status(
                Status::Removed,
                format!("{} from {}", format_size(freed), cache.root().display()),
            );
        }
    }

    Ok(())
}
