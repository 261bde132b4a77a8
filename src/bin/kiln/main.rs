//! Kiln CLI - build, install and smoke-test software from recipes

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands, MessageFormat};
use kiln::core::PipelineError;
use kiln::util::diagnostic::emit;
use kiln::util::Shell;

/// Options shared by every command.
pub struct GlobalOptions {
    pub shell: Arc<Shell>,
}

fn main() {
    let cli = Cli::parse();
    let shell = Arc::new(Shell::from_flags(
        cli.quiet,
        cli.verbose,
        cli.color,
        cli.message_format == MessageFormat::Json,
    ));

    if let Err(e) = run(cli, &shell) {
        report_error(&shell, &e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, shell: &Arc<Shell>) -> Result<()> {
    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("kiln=debug")
    } else {
        EnvFilter::new("kiln=info")
    };

    if !cli.quiet && cli.message_format == MessageFormat::Human {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }

    let global_opts = GlobalOptions {
        shell: Arc::clone(shell),
    };

    // Execute command
    match cli.command {
        Commands::Install(args) => commands::install::execute(args, &global_opts),
        Commands::Fetch(args) => commands::fetch::execute(args, &global_opts),
        Commands::Test(args) => commands::test::execute(args, &global_opts),
        Commands::Info(args) => commands::info::execute(args, &global_opts),
        Commands::Livecheck(args) => commands::livecheck::execute(args, &global_opts),
        Commands::Cache(args) => commands::cache::execute(args, &global_opts),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}

fn report_error(shell: &Shell, e: &anyhow::Error) {
    let Some(err) = e.downcast_ref::<PipelineError>() else {
        if shell.is_json() {
            shell.error(format!("{:#}", e));
        } else {
            eprintln!("error: {:#}", e);
        }
        return;
    };

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "error",
            "stage": err.stage(),
            "message": err.to_string(),
        }));
    } else {
        emit(&err.to_diagnostic(), shell.use_color());
    }
}
