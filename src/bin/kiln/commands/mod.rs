//! Command implementations

pub mod cache;
pub mod completions;
pub mod fetch;
pub mod info;
pub mod install;
pub mod livecheck;
pub mod test;

use std::cell::RefCell;

use anyhow::{Context, Result};

use kiln::builder::{PipelineEvent, Reporter, Stage};
use kiln::core::recipe::StepKind;
use kiln::sources::HttpTransport;
use kiln::util::shell::{format_duration, Spinner};
use kiln::util::{GlobalContext, Shell, Status};

/// Create the global context for a command.
pub(crate) fn context(shell: &Shell) -> Result<GlobalContext> {
    let mut ctx = GlobalContext::new().context("failed to create global context")?;
    ctx.set_verbose(shell.is_verbose());
    Ok(ctx)
}

/// HTTP transport configured from `[fetch]`.
pub(crate) fn transport(ctx: &GlobalContext) -> Result<HttpTransport> {
    let fetch = &ctx.config().fetch;
    HttpTransport::new(fetch.user_agent.as_deref(), fetch.timeout())
}

/// Renders pipeline events through the shell.
pub(crate) struct ShellReporter<'a> {
    shell: &'a Shell,
    spinner: RefCell<Option<Spinner>>,
}

impl<'a> ShellReporter<'a> {
    pub(crate) fn new(shell: &'a Shell) -> Self {
        ShellReporter {
            shell,
            spinner: RefCell::new(None),
        }
    }

    fn stop_spinner(&self) {
        self.spinner.borrow_mut().take();
    }
}

impl Reporter for ShellReporter<'_> {
    fn report(&self, event: &PipelineEvent) {
        let shell = self.shell;

        if shell.is_json() {
            if let Ok(value) = serde_json::to_value(event) {
                shell.json_event(&value);
            }
            return;
        }

        match event {
            PipelineEvent::StageStarted { stage, detail } => {
                let status = match stage {
                    Stage::Fetch => Status::Fetching,
                    Stage::Stage => Status::Staging,
                    Stage::Patch => Status::Patching,
                    Stage::Build => Status::Building,
                    Stage::Relocate => Status::Relocating,
                    Stage::Test => Status::Testing,
                };
                shell.status(status, detail);
            }
            PipelineEvent::Fetched { url, path } => {
                shell.verbose(format!("{} -> {}", url, path.display()));
            }
            PipelineEvent::ResourceStaged { name, skipped: true } => {
                shell.status(
                    Status::Skipped,
                    format!("resource `{}` (not needed on this platform)", name),
                );
            }
            PipelineEvent::ResourceStaged { name, skipped: false } => {
                shell.status(Status::Staging, format!("resource `{}` done", name));
            }
            PipelineEvent::PatchApplied { url } => {
                shell.status(Status::Patching, url);
            }
            PipelineEvent::StepStarted {
                index,
                kind,
                command,
            } => {
                let status = match kind {
                    StepKind::Configure => Status::Configuring,
                    StepKind::Install => Status::Installing,
                    StepKind::Compile | StepKind::Custom => Status::Building,
                };
                shell.status(status, command);
                *self.spinner.borrow_mut() =
                    Some(shell.spinner(status, format!("step {} ({})", index, kind)));
            }
            PipelineEvent::StepFinished {
                index,
                kind,
                skipped,
                duration_ms,
            } => {
                self.stop_spinner();
                if *skipped {
                    shell.verbose(format!("skipped step {} ({})", index, kind));
                } else {
                    shell.verbose(format!(
                        "step {} ({}) finished in {}",
                        index,
                        kind,
                        format_duration(std::time::Duration::from_millis(*duration_ms))
                    ));
                }
            }
            PipelineEvent::Relocated { from, to } => {
                shell.verbose(format!("{} -> {}", from.display(), to.display()));
            }
            PipelineEvent::TestStep { name, passed, .. } => {
                shell.verbose(format!(
                    "test step `{}` {}",
                    name,
                    if *passed { "ok" } else { "failed" }
                ));
            }
            PipelineEvent::Finished { .. } => self.stop_spinner(),
        }
    }
}

/// Format a byte count for display.
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
