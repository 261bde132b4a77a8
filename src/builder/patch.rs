//! Source patching.
//!
//! Patches are fetched like any other artifact, checked with a dry run and
//! then applied with `patch -p<strip>`, in declared order. A patch that does
//! not apply stops the pipeline; patches applied before it stay applied.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::builder::events::{PipelineEvent, Reporter};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::platform::Platform;
use crate::core::recipe::{filename_from_url, Patch};
use crate::sources::fetch::Fetcher;
use crate::util::process::{combined_output, find_executable, ProcessBuilder};

/// A patch that was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPatch {
    pub url: String,
    pub sha256: String,
}

/// Apply every patch whose predicate holds to `source_dir`.
pub fn apply_patches(
    source_dir: &Path,
    patches: &[Patch],
    platform: &Platform,
    fetcher: &Fetcher<'_>,
    reporter: &dyn Reporter,
) -> PipelineResult<Vec<AppliedPatch>> {
    let active: Vec<&Patch> = patches.iter().filter(|p| p.when.matches(platform)).collect();
    if active.is_empty() {
        return Ok(Vec::new());
    }

    let patch_tool = find_executable("patch").ok_or_else(|| PipelineError::Patch {
        patch: active[0].url.clone(),
        diagnostic: "`patch` was not found in PATH".to_string(),
    })?;

    let mut applied = Vec::with_capacity(active.len());
    for patch in active {
        let filename = filename_from_url(&patch.url, "patch.diff");
        let file = fetcher.fetch_as(&patch.url, &patch.sha256, &filename)?;

        tracing::info!("Applying patch {}", patch.url);
        apply_one(&patch_tool, source_dir, patch, &file)?;

        reporter.report(&PipelineEvent::PatchApplied {
            url: patch.url.clone(),
        });
        applied.push(AppliedPatch {
            url: patch.url.clone(),
            sha256: patch.sha256.to_ascii_lowercase(),
        });
    }

    Ok(applied)
}

fn apply_one(tool: &Path, source_dir: &Path, patch: &Patch, file: &Path) -> PipelineResult<()> {
    let base = ProcessBuilder::new(tool)
        .arg(format!("-p{}", patch.strip))
        .args(["-t", "-N", "-i"])
        .arg(file)
        .cwd(source_dir);

    // Check first so a patch that does not apply leaves the tree untouched.
    run_patch(base.clone().arg("--dry-run"), patch)?;
    run_patch(base, patch)
}

fn run_patch(cmd: ProcessBuilder, patch: &Patch) -> PipelineResult<()> {
    tracing::debug!("{}", cmd.display_command());

    let output = cmd.exec().map_err(|e| PipelineError::Patch {
        patch: patch.url.clone(),
        diagnostic: format!("{:#}", e),
    })?;

    if !output.status.success() {
        return Err(PipelineError::Patch {
            patch: patch.url.clone(),
            diagnostic: combined_output(&output),
        });
    }

    Ok(())
}
