//! Pipeline error taxonomy.
//!
//! Every stage failure is fatal: the pipeline stops at the first error and
//! nothing is retried.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Lines of captured output shown when a command fails.
const OUTPUT_TAIL_LINES: usize = 20;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error raised by a pipeline stage.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum PipelineError {
    #[error("failed to fetch `{url}`: {message}")]
    #[diagnostic(code(kiln::fetch))]
    Fetch { url: String, message: String },

    #[error("checksum mismatch for `{url}`")]
    #[diagnostic(
        code(kiln::fetch::integrity),
        help("expected sha256 {expected}, got {actual}")
    )]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("failed to stage resource `{resource}`: {source}")]
    #[diagnostic(code(kiln::stage))]
    Stage {
        resource: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("failed to apply patch `{patch}`")]
    #[diagnostic(code(kiln::patch))]
    Patch { patch: String, diagnostic: String },

    #[error("build step {index} failed: `{command}`")]
    #[diagnostic(code(kiln::build))]
    BuildStep {
        index: usize,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("expected installed file is missing: {}", path.display())]
    #[diagnostic(code(kiln::relocate))]
    Relocation { path: PathBuf },

    #[error("acceptance test failed at `{step}`: {message}")]
    #[diagnostic(code(kiln::test))]
    Acceptance { step: String, message: String },

    #[error("acceptance test timed out at `{step}` after {waited:?}")]
    #[diagnostic(code(kiln::test::timeout))]
    AcceptanceTimeout { step: String, waited: Duration },

    #[error("invalid recipe: {message}")]
    #[diagnostic(code(kiln::recipe))]
    Recipe { message: String },

    #[error("{0:#}")]
    #[diagnostic(code(kiln::other))]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn fetch(url: impl Into<String>, message: impl ToString) -> Self {
        PipelineError::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn acceptance(step: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Acceptance {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn recipe(message: impl Into<String>) -> Self {
        PipelineError::Recipe {
            message: message.into(),
        }
    }

    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Fetch { .. } | PipelineError::Integrity { .. } => "fetch",
            PipelineError::Stage { .. } => "stage",
            PipelineError::Patch { .. } => "patch",
            PipelineError::BuildStep { .. } => "build",
            PipelineError::Relocation { .. } => "relocate",
            PipelineError::Acceptance { .. } | PipelineError::AcceptanceTimeout { .. } => "test",
            PipelineError::Recipe { .. } => "recipe",
            PipelineError::Other(_) => "setup",
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            PipelineError::Fetch { url, message } => {
                Diagnostic::error(format!("failed to fetch `{}`", url))
                    .with_context(message.clone())
                    .with_suggestion(suggestions::FETCH)
            }

            PipelineError::Integrity {
                url,
                expected,
                actual,
            } => Diagnostic::error(format!("checksum mismatch for `{}`", url))
                .with_context(format!("expected: {}", expected))
                .with_context(format!("actual:   {}", actual))
                .with_suggestion(suggestions::INTEGRITY),

            PipelineError::Stage { resource, source } => {
                let inner = source.to_diagnostic();
                let mut diag =
                    Diagnostic::error(format!("failed to stage resource `{}`", resource))
                        .with_context(inner.message);
                diag.context.extend(inner.context);
                diag.suggestions.extend(inner.suggestions);
                diag
            }

            PipelineError::Patch { patch, diagnostic } => {
                Diagnostic::error(format!("failed to apply patch `{}`", patch))
                    .with_output_tail(diagnostic, OUTPUT_TAIL_LINES)
                    .with_suggestion(suggestions::PATCH)
            }

            PipelineError::BuildStep {
                index,
                command,
                exit_code,
                output,
            } => {
                let code = match exit_code {
                    Some(code) => code.to_string(),
                    None => "killed by signal".to_string(),
                };
                Diagnostic::error(format!("build step {} failed", index))
                    .with_context(format!("command: {}", command))
                    .with_context(format!("exit code: {}", code))
                    .with_output_tail(output, OUTPUT_TAIL_LINES)
                    .with_suggestion(suggestions::BUILD_STEP)
            }

            PipelineError::Relocation { path } => {
                Diagnostic::error("expected installed file is missing")
                    .with_location(path.clone())
                    .with_suggestion(suggestions::RELOCATION)
            }

            PipelineError::Acceptance { step, message } => {
                Diagnostic::error(format!("acceptance test failed at `{}`", step))
                    .with_output_tail(message, OUTPUT_TAIL_LINES)
                    .with_suggestion(suggestions::ACCEPTANCE)
            }

            PipelineError::AcceptanceTimeout { step, waited } => Diagnostic::error(format!(
                "acceptance test timed out at `{}`",
                step
            ))
            .with_context(format!("gave up after {:.1}s", waited.as_secs_f64()))
            .with_suggestion("Raise `[test] probe_timeout_secs` if the machine is under load")
            .with_suggestion(suggestions::ACCEPTANCE),

            PipelineError::Recipe { message } => Diagnostic::error("invalid recipe")
                .with_context(message.clone())
                .with_suggestion(suggestions::RECIPE),

            PipelineError::Other(err) => Diagnostic::error(format!("{:#}", err)),
        }
    }
}
