//! Implementation of `kiln fetch`.

use std::path::PathBuf;

use serde::Serialize;

use crate::builder::events::{PipelineEvent, Reporter};
use crate::core::error::PipelineResult;
use crate::core::platform::Platform;
use crate::core::recipe::{filename_from_url, Recipe};
use crate::sources::fetch::Fetcher;

/// An artifact present in the download cache.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedArtifact {
    pub url: String,
    pub path: PathBuf,
}

/// Download and verify every artifact `recipe` needs on `platform`: the
/// source, active resources and active patches.
pub fn fetch_recipe(
    recipe: &Recipe,
    platform: &Platform,
    fetcher: &Fetcher<'_>,
    reporter: &dyn Reporter,
) -> PipelineResult<Vec<FetchedArtifact>> {
    let mut wanted = vec![(
        recipe.source.url.as_str(),
        recipe.source.sha256.as_str(),
        recipe.source_filename(),
    )];
    for resource in recipe.active_resources(platform) {
        wanted.push((
            resource.url.as_str(),
            resource.sha256.as_str(),
            filename_from_url(&resource.url, &resource.name),
        ));
    }
    for patch in recipe.patches.iter().filter(|p| p.when.matches(platform)) {
        wanted.push((
            patch.url.as_str(),
            patch.sha256.as_str(),
            filename_from_url(&patch.url, "patch.diff"),
        ));
    }

    let mut fetched = Vec::with_capacity(wanted.len());
    for (url, sha256, filename) in wanted {
        let path = fetcher.fetch_as(url, sha256, &filename)?;
        reporter.report(&PipelineEvent::Fetched {
            url: url.to_string(),
            path: path.clone(),
        });
        fetched.push(FetchedArtifact {
            url: url.to_string(),
            path,
        });
    }

    Ok(fetched)
}
