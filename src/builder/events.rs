//! Pipeline events.
//!
//! Stages report progress as [`PipelineEvent`]s through a [`Reporter`]. The
//! CLI turns them into status lines, or prints them one JSON object per line
//! with `--message-format=json`.
//!
//! The JSON schema is stable: fields may be added, but existing fields are
//! not removed or renamed.

use std::path::PathBuf;

use serde::Serialize;

use crate::core::recipe::StepKind;

/// Something that happened while running a recipe.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum PipelineEvent {
    /// A top-level stage began.
    StageStarted { stage: Stage, detail: String },

    /// An artifact was served from the cache or downloaded.
    Fetched {
        url: String,
        path: PathBuf,
    },

    /// A resource was staged or skipped because its predicate is false.
    ResourceStaged { name: String, skipped: bool },

    PatchApplied { url: String },

    /// A build step is about to run.
    StepStarted {
        index: usize,
        kind: StepKind,
        command: String,
    },

    /// A build step finished successfully or was skipped.
    StepFinished {
        index: usize,
        kind: StepKind,
        skipped: bool,
        duration_ms: u64,
    },

    Relocated { from: PathBuf, to: PathBuf },

    /// An acceptance test step finished.
    TestStep {
        name: String,
        passed: bool,
        duration_ms: u64,
    },

    /// The pipeline ended.
    Finished { success: bool, duration_ms: u64 },
}

/// Top-level pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Stage,
    Patch,
    Build,
    Relocate,
    Test,
}

/// Receives pipeline events.
pub trait Reporter {
    fn report(&self, event: &PipelineEvent);
}

/// Drops every event.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: &PipelineEvent) {}
}

impl<F> Reporter for F
where
    F: Fn(&PipelineEvent),
{
    fn report(&self, event: &PipelineEvent) {
        self(event)
    }
}
