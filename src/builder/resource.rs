//! Resource staging.
//!
//! A resource is built into its own private prefix under the work directory
//! and contributes environment edits to the main build through its
//! `exports`. It never installs into the recipe's prefix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::builder::events::{PipelineEvent, Reporter};
use crate::builder::step::StepRunner;
use crate::core::env::EnvOverlay;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::platform::Platform;
use crate::core::recipe::{filename_from_url, Resource};
use crate::sources::archive::extract_archive;
use crate::sources::fetch::Fetcher;
use crate::util::template::Vars;

/// Stages resources for one pipeline run.
pub struct Stager<'a> {
    fetcher: &'a Fetcher<'a>,
    work_dir: &'a Path,
    base_env: &'a BTreeMap<String, String>,
    make: &'a str,
    jobs: usize,
    reporter: &'a dyn Reporter,
}

impl<'a> Stager<'a> {
    pub fn new(
        fetcher: &'a Fetcher<'a>,
        work_dir: &'a Path,
        base_env: &'a BTreeMap<String, String>,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Stager {
            fetcher,
            work_dir,
            base_env,
            make: "make",
            jobs: 1,
            reporter,
        }
    }

    pub fn make(mut self, make: &'a str) -> Self {
        self.make = make;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Private install prefix of a resource.
    pub fn private_prefix(&self, resource: &Resource) -> PathBuf {
        self.resource_dir(resource).join("prefix")
    }

    fn resource_dir(&self, resource: &Resource) -> PathBuf {
        let slug: String = resource
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.work_dir.join("resources").join(slug)
    }

    /// Stage `resource` if its predicate holds on `platform`.
    ///
    /// Returns the overlay built from the resource's exports, or an empty
    /// overlay without fetching or running anything when the predicate is
    /// false.
    pub fn stage(
        &self,
        resource: &Resource,
        platform: &Platform,
        parent: &EnvOverlay,
    ) -> PipelineResult<EnvOverlay> {
        if !resource.when.matches(platform) {
            tracing::debug!(
                "skipping resource `{}`: {} does not hold on {}",
                resource.name,
                resource.when,
                platform
            );
            self.reporter.report(&PipelineEvent::ResourceStaged {
                name: resource.name.clone(),
                skipped: true,
            });
            return Ok(EnvOverlay::new());
        }

        tracing::info!("Staging resource `{}`", resource.name);
        let overlay = self
            .stage_inner(resource, platform, parent)
            .map_err(|e| PipelineError::Stage {
                resource: resource.name.clone(),
                source: Box::new(e),
            })?;

        self.reporter.report(&PipelineEvent::ResourceStaged {
            name: resource.name.clone(),
            skipped: false,
        });
        Ok(overlay)
    }

    fn stage_inner(
        &self,
        resource: &Resource,
        platform: &Platform,
        parent: &EnvOverlay,
    ) -> PipelineResult<EnvOverlay> {
        let filename = filename_from_url(&resource.url, &resource.name);
        let archive = self
            .fetcher
            .fetch_as(&resource.url, &resource.sha256, &filename)?;
        self.reporter.report(&PipelineEvent::Fetched {
            url: resource.url.clone(),
            path: archive.clone(),
        });

        let dir = self.resource_dir(resource);
        let src = extract_archive(&archive, &dir.join("src"))?;
        let prefix = self.private_prefix(resource);
        std::fs::create_dir_all(&prefix).map_err(anyhow::Error::from)?;

        let vars = Vars::new()
            .with("name", &resource.name)
            .with_path("prefix", &prefix)
            .with_path("buildpath", &src)
            .with("jobs", self.jobs.to_string());

        StepRunner::new(&src, &vars, platform, self.base_env, self.reporter)
            .make(self.make)
            .run(&resource.steps, parent)?;

        let overlay = resource.exports.iter().fold(EnvOverlay::new(), |acc, export| {
            acc.with(
                export.var.clone(),
                export.op,
                prefix.join(&export.path).display().to_string(),
            )
        });

        Ok(overlay)
    }
}
