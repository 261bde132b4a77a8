//! Implementation of `kiln install`.
//!
//! Runs a recipe through every stage in order:
//!
//! 1. fetch and extract the source archive
//! 2. stage resources into private prefixes
//! 3. apply patches
//! 4. run the build steps against the install prefix
//! 5. relocate installed files
//! 6. run the acceptance test
//! 7. render caveats
//! 8. write the install receipt
//!
//! The first failing stage ends the run. A prefix created by a failed run is
//! removed again, and a failed reinstall drops the old receipt. Each run works in its own
//! temporary directory, removed afterwards unless `keep_work` is set.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;

use crate::builder::events::{PipelineEvent, Reporter, Stage};
use crate::builder::patch::{apply_patches, AppliedPatch};
use crate::builder::relocate::{relocate, Relocations};
use crate::builder::resource::Stager;
use crate::builder::step::{StepOutcome, StepRunner};
use crate::core::env::{base_environment, EnvOverlay};
use crate::core::error::PipelineResult;
use crate::core::platform::Platform;
use crate::core::recipe::Recipe;
use crate::ops::acceptance::{run_acceptance, AcceptanceOptions, AcceptanceReport};
use crate::ops::caveats::render_caveats;
use crate::ops::receipt::Receipt;
use crate::sources::archive::extract_archive;
use crate::sources::fetch::Fetcher;
use crate::sources::transport::Transport;
use crate::util::context::GlobalContext;
use crate::util::fs::remove_dir_all_if_exists;
use crate::util::process::find_make;

/// Options for the install command.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Install prefix (default: `<cellar>/<name>/<pkg_version>`)
    pub prefix: Option<PathBuf>,

    /// Keep the work directory after the run
    pub keep_work: bool,

    /// Run the acceptance test after installing
    pub run_test: bool,

    /// Number of parallel build jobs
    pub jobs: Option<usize>,

    /// Build driver for compile and install steps
    pub make: Option<String>,

    /// Platform to evaluate predicates against (default: the host)
    pub platform: Option<Platform>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        InstallOptions {
            prefix: None,
            keep_work: false,
            run_test: true,
            jobs: None,
            make: None,
            platform: None,
        }
    }
}

/// What an install did.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub name: String,
    pub pkg_version: String,
    pub prefix: PathBuf,
    pub platform: Platform,
    /// Resources that were built, in order.
    pub resources: Vec<String>,
    pub patches: Vec<AppliedPatch>,
    pub steps: Vec<StepOutcome>,
    pub relocations: Relocations,
    pub receipt: PathBuf,
    pub test: Option<AcceptanceReport>,
    pub caveats: Option<String>,
    /// Set when the work directory was kept.
    pub work_dir: Option<PathBuf>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Drives one recipe through the staged pipeline.
pub struct Pipeline<'a> {
    ctx: &'a GlobalContext,
    transport: &'a dyn Transport,
    reporter: &'a dyn Reporter,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        ctx: &'a GlobalContext,
        transport: &'a dyn Transport,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Pipeline {
            ctx,
            transport,
            reporter,
        }
    }

    /// Run `recipe` end to end.
    pub fn run(&self, recipe: &Recipe, options: &InstallOptions) -> PipelineResult<InstallReport> {
        let start = Instant::now();
        let result = self.run_stages(recipe, options, start);

        self.reporter.report(&PipelineEvent::Finished {
            success: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
        });
        result
    }

    fn run_stages(
        &self,
        recipe: &Recipe,
        options: &InstallOptions,
        start: Instant,
    ) -> PipelineResult<InstallReport> {
        let config = self.ctx.config();
        let platform = options.platform.clone().unwrap_or_else(Platform::current);
        let prefix = options
            .prefix
            .clone()
            .unwrap_or_else(|| self.ctx.default_prefix(&recipe.name, &recipe.pkg_version()));
        let jobs = options
            .jobs
            .or(config.build.jobs)
            .unwrap_or_else(default_jobs)
            .max(1);
        let make = options
            .make
            .clone()
            .or_else(|| config.build.make.clone())
            .or_else(|| find_make().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "make".to_string());
        let keep_work = options.keep_work || config.build.keep_work;

        tracing::info!(
            "Installing {} {} into {} ({})",
            recipe.name,
            recipe.pkg_version(),
            prefix.display(),
            platform
        );

        let work_root = self.ctx.work_root();
        self.ctx.ensure_dir(&work_root)?;
        let work = tempfile::Builder::new()
            .prefix(&format!("{}-", recipe.name))
            .tempdir_in(&work_root)
            .with_context(|| format!("failed to create work directory in {}", work_root.display()))?;
        tracing::debug!("work directory {}", work.path().display());

        let fetcher = Fetcher::new(&self.ctx.cache_dir(), self.transport);
        let base_env = base_environment();

        // Fetch
        self.stage_started(Stage::Fetch, &recipe.source.url);
        let archive =
            fetcher.fetch_as(&recipe.source.url, &recipe.source.sha256, &recipe.source_filename())?;
        self.reporter.report(&PipelineEvent::Fetched {
            url: recipe.source.url.clone(),
            path: archive.clone(),
        });
        let buildpath = extract_archive(&archive, &work.path().join("src"))?;
        tracing::debug!("source extracted to {}", buildpath.display());

        // Stage
        let mut overlay = EnvOverlay::new().set("MAKEFLAGS", format!("-j{}", jobs));
        let mut staged = Vec::new();
        if !recipe.resources.is_empty() {
            self.stage_started(Stage::Stage, &format!("{} resource(s)", recipe.resources.len()));
            let stager = Stager::new(&fetcher, work.path(), &base_env, self.reporter)
                .make(&make)
                .jobs(jobs);
            for resource in &recipe.resources {
                let exports = stager.stage(resource, &platform, &overlay)?;
                if resource.when.matches(&platform) {
                    staged.push(resource.name.clone());
                }
                overlay = overlay.merge(&exports);
            }
        }

        for entry in recipe.env.iter().filter(|e| e.when.matches(&platform)) {
            overlay = overlay.with(entry.var.clone(), entry.op, entry.value.clone());
        }

        // Patch
        if !recipe.patches.is_empty() {
            self.stage_started(Stage::Patch, &format!("{} patch(es)", recipe.patches.len()));
        }
        let patches = apply_patches(&buildpath, &recipe.patches, &platform, &fetcher, self.reporter)?;

        // Build
        self.stage_started(Stage::Build, &format!("{} step(s)", recipe.steps.len()));
        let fresh_prefix = !prefix.exists();
        self.ctx.ensure_dir(&prefix)?;
        let vars = recipe.build_vars(&prefix, &buildpath, jobs);

        let outcome = (|| -> PipelineResult<_> {
            let steps = StepRunner::new(&buildpath, &vars, &platform, &base_env, self.reporter)
                .make(&make)
                .run(&recipe.steps, &overlay)?;

            // Relocate
            let relocations = relocate(recipe.relocate.as_ref(), &platform, &prefix)?;
            if !relocations.is_empty() {
                self.stage_started(Stage::Relocate, &format!("{} file(s)", relocations.len()));
            }
            for r in relocations.iter() {
                self.reporter.report(&PipelineEvent::Relocated {
                    from: r.from.clone(),
                    to: r.to.clone(),
                });
            }

            // Test
            let test = match recipe.test {
                Some(ref spec) if options.run_test => {
                    self.stage_started(Stage::Test, &spec.binary);
                    let binary = prefix.join(relocations.resolve(Path::new(&spec.binary)));
                    let test_options = AcceptanceOptions {
                        prefix: prefix.clone(),
                        testpath: Some(work.path().join("test")),
                        probe_timeout: config.test.probe_timeout(),
                        probe_interval: config.test.probe_interval(),
                        command_timeout: config.test.command_timeout(),
                    };
                    Some(run_acceptance(&binary, spec, &test_options, self.reporter)?)
                }
                Some(_) => {
                    tracing::info!("Skipping acceptance test");
                    None
                }
                None => None,
            };

            let caveats = render_caveats(recipe, &platform, &vars)?;

            // Receipt
            let configure_flags = recipe
                .configure_flags(&platform)
                .into_iter()
                .map(|f| vars.expand(f))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let mut receipt = Receipt::new(recipe, &platform);
            receipt.patches = patches.clone();
            receipt.resources = staged.clone();
            receipt.configure_flags = configure_flags;
            receipt.relocations = relocations.clone();
            let receipt_path = receipt.save(&prefix)?;

            Ok((steps, relocations, test, caveats, receipt_path))
        })();

        let (steps, relocations, test, caveats, receipt_path) = match outcome {
            Ok(done) => done,
            Err(e) => {
                discard_prefix(&prefix, fresh_prefix);
                return Err(e);
            }
        };

        let work_dir = if keep_work {
            let path = work.keep();
            tracing::info!("Kept work directory {}", path.display());
            Some(path)
        } else {
            None
        };

        Ok(InstallReport {
            name: recipe.name.clone(),
            pkg_version: recipe.pkg_version(),
            prefix,
            platform,
            resources: staged,
            patches,
            steps,
            relocations,
            receipt: receipt_path,
            test,
            caveats,
            work_dir,
            duration: start.elapsed(),
        })
    }

    fn stage_started(&self, stage: Stage, detail: &str) {
        tracing::debug!("stage {:?}: {}", stage, detail);
        self.reporter.report(&PipelineEvent::StageStarted {
            stage,
            detail: detail.to_string(),
        });
    }
}

/// Install `recipe` with the given options.
pub fn install(
    recipe: &Recipe,
    options: &InstallOptions,
    ctx: &GlobalContext,
    transport: &dyn Transport,
    reporter: &dyn Reporter,
) -> PipelineResult<InstallReport> {
    Pipeline::new(ctx, transport, reporter).run(recipe, options)
}

/// Undo a failed install: a prefix this run created is removed, an existing
/// one loses its receipt.
fn discard_prefix(prefix: &Path, created: bool) {
    let result = if created {
        remove_dir_all_if_exists(prefix)
    } else {
        let receipt = Receipt::path(prefix);
        if receipt.exists() {
            std::fs::remove_file(&receipt)
                .with_context(|| format!("failed to remove {}", receipt.display()))
        } else {
            Ok(())
        }
    };
    if let Err(e) = result {
        tracing::warn!("could not clean up {}: {:#}", prefix.display(), e);
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::builder::events::NullReporter;
    use crate::core::error::PipelineError;
    use crate::core::platform::Os;
    use crate::test_support::fixtures::{build_tar_gz, hello_tarball, minimal_recipe_toml};
    use crate::test_support::MockTransport;
    use crate::util::hash::sha256_bytes;
    use std::cell::RefCell;
    use tempfile::TempDir;

    const SOURCE: &str = "https://example.invalid/hello-1.0.tar.gz";

    fn context(tmp: &TempDir) -> GlobalContext {
        GlobalContext::with_home(tmp.path().to_path_buf(), tmp.path().join("home"))
    }

    fn linux() -> Option<Platform> {
        Some(Platform::new(Os::Linux, Some("6.1"), "x86_64"))
    }

    #[test]
    fn test_minimal_recipe_installs() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let (bytes, sha) = hello_tarball();
        let transport = MockTransport::new().with_body(SOURCE, bytes);
        let recipe: Recipe = minimal_recipe_toml(SOURCE, &sha).parse().unwrap();

        let options = InstallOptions {
            platform: linux(),
            ..Default::default()
        };
        let report = install(&recipe, &options, &ctx, &transport, &NullReporter).unwrap();

        assert_eq!(report.prefix, ctx.default_prefix("hello", "1.0"));
        assert_eq!(std::fs::read_to_string(report.prefix.join("out")).unwrap(), "ok");
        assert!(report.receipt.is_file());
        assert!(report.work_dir.is_none());
        assert_eq!(std::fs::read_dir(ctx.work_root()).unwrap().count(), 0);
    }

    #[test]
    fn test_second_install_uses_cache() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let (bytes, sha) = hello_tarball();
        let transport = MockTransport::new().with_body(SOURCE, bytes);
        let recipe: Recipe = minimal_recipe_toml(SOURCE, &sha).parse().unwrap();

        let options = InstallOptions {
            platform: linux(),
            prefix: Some(tmp.path().join("prefix")),
            ..Default::default()
        };
        install(&recipe, &options, &ctx, &transport, &NullReporter).unwrap();
        install(&recipe, &options, &ctx, &transport, &NullReporter).unwrap();

        assert_eq!(transport.request_count(SOURCE), 1);
    }

    #[test]
    fn test_integrity_failure_stops_before_build() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let (bytes, _) = hello_tarball();
        let transport = MockTransport::new().with_body(SOURCE, bytes);
        let recipe: Recipe = minimal_recipe_toml(SOURCE, &"0".repeat(64)).parse().unwrap();
        let prefix = tmp.path().join("prefix");

        let options = InstallOptions {
            platform: linux(),
            prefix: Some(prefix.clone()),
            ..Default::default()
        };
        let err = install(&recipe, &options, &ctx, &transport, &NullReporter).unwrap_err();

        assert!(matches!(err, PipelineError::Integrity { .. }));
        assert!(!prefix.exists());
    }

    #[test]
    fn test_full_pipeline_with_resource_env_relocation_and_caveats() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let (source, source_sha) = hello_tarball();
        let tool = build_tar_gz(&[("tool-1.0/lib/tool.txt", b"tool\n")]);
        let transport = MockTransport::new()
            .with_body(SOURCE, source)
            .with_body("https://example.invalid/tool-1.0.tar.gz", tool.clone());

        let toml = format!(
            r#"name = "hello"
version = "1.0"
revision = 2

[source]
url = "{SOURCE}"
sha256 = "{source_sha}"

[[resources]]
name = "tool"
url = "https://example.invalid/tool-1.0.tar.gz"
sha256 = "{tool_sha}"
steps = [{{ kind = "custom", program = "cp", args = ["-R", "lib", "{{prefix}}/lib"] }}]
exports = [{{ var = "TOOL_LIB", path = "lib", op = "set" }}]

[[resources]]
name = "mac-only"
url = "https://example.invalid/never.tar.gz"
sha256 = "{source_sha}"
when = {{ os = "macos" }}

[[env]]
var = "HELLO_FLAGS"
op = "append"
value = "-L{{lib}}"

[[steps]]
kind = "configure"
flags = ["--prefix={{prefix}}", {{ flag = "--mac", when = {{ os = "macos" }} }}]

[[steps]]
kind = "custom"
program = "sh"
args = ["-c", "mkdir -p {{sbin}} && cat $TOOL_LIB/tool.txt > {{sbin}}/hellod && printf %s \"$HELLO_FLAGS\" > {{prefix}}/flags"]

[relocate]
prefix = "x-"
entries = [{{ dir = "sbin", name = "hellod" }}]

[caveats]
text = "hellod was installed as {{sbin}}/x-hellod"
"#,
            tool_sha = sha256_bytes(&tool),
        );
        let recipe: Recipe = toml.parse().unwrap();

        let events = RefCell::new(Vec::new());
        let reporter = |e: &PipelineEvent| {
            events
                .borrow_mut()
                .push(serde_json::to_value(e).unwrap()["reason"].to_string())
        };

        let prefix = tmp.path().join("prefix");
        let options = InstallOptions {
            platform: linux(),
            prefix: Some(prefix.clone()),
            keep_work: true,
            ..Default::default()
        };
        let report = install(&recipe, &options, &ctx, &transport, &reporter).unwrap();

        assert_eq!(report.pkg_version, "1.0_2");
        assert_eq!(report.resources, vec!["tool".to_string()]);
        assert_eq!(std::fs::read_to_string(prefix.join("sbin/x-hellod")).unwrap(), "tool\n");
        assert!(!prefix.join("sbin/hellod").exists());
        assert_eq!(
            std::fs::read_to_string(prefix.join("flags")).unwrap(),
            format!("-L{}/lib", prefix.display())
        );
        assert_eq!(
            report.caveats.as_deref(),
            Some(format!("hellod was installed as {}/sbin/x-hellod", prefix.display()).as_str())
        );
        assert_eq!(transport.request_count("https://example.invalid/never.tar.gz"), 0);

        let receipt = Receipt::load(&prefix).unwrap().unwrap();
        assert_eq!(receipt.configure_flags, vec![format!("--prefix={}", prefix.display())]);
        assert_eq!(receipt.relocations.len(), 1);

        let work = report.work_dir.unwrap();
        assert!(work.join("resources/tool/prefix/lib/tool.txt").is_file());

        let events = events.into_inner();
        assert_eq!(events.first().map(String::as_str), Some("\"stage-started\""));
        assert_eq!(events.last().map(String::as_str), Some("\"finished\""));
        assert!(events.iter().any(|e| e == "\"relocated\""));
    }

    #[test]
    fn test_failed_acceptance_leaves_nothing_installed() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let (bytes, sha) = hello_tarball();
        let transport = MockTransport::new().with_body(SOURCE, bytes);
        let toml = minimal_recipe_toml(SOURCE, &sha)
            + r#"
[[steps]]
kind = "custom"
program = "sh"
args = ["-c", "mkdir -p {bin} && printf '#!/bin/sh\\nexit 1\\n' > {bin}/serve && chmod +x {bin}/serve"]

[test]
binary = "bin/serve"
introspect = [["--version"]]
fixtures = [{ path = "hello", content = "hello" }]

[test.client]
kind = "command"
program = "true"

[test.exchange]
retrieved = "hello"
expected = "hello"
"#;
        let recipe: Recipe = toml.parse().unwrap();
        let prefix = tmp.path().join("prefix");

        let options = InstallOptions {
            platform: linux(),
            prefix: Some(prefix.clone()),
            ..Default::default()
        };
        let err = install(&recipe, &options, &ctx, &transport, &NullReporter).unwrap_err();

        assert!(matches!(err, PipelineError::Acceptance { ref step, .. } if step == "introspect"));
        assert!(Receipt::load(&prefix).unwrap().is_none());
        assert!(!prefix.exists());
    }

    #[test]
    fn test_failed_reinstall_drops_old_receipt() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let (bytes, sha) = hello_tarball();
        let transport = MockTransport::new().with_body(SOURCE, bytes);
        let mut recipe: Recipe = minimal_recipe_toml(SOURCE, &sha).parse().unwrap();
        let prefix = tmp.path().join("prefix");

        let options = InstallOptions {
            platform: linux(),
            prefix: Some(prefix.clone()),
            ..Default::default()
        };
        install(&recipe, &options, &ctx, &transport, &NullReporter).unwrap();
        assert!(Receipt::load(&prefix).unwrap().is_some());

        recipe.steps.push(crate::core::recipe::BuildStep {
            action: crate::core::recipe::StepAction::Custom {
                program: "false".into(),
                args: vec![],
            },
            when: Default::default(),
        });
        install(&recipe, &options, &ctx, &transport, &NullReporter).unwrap_err();

        assert!(prefix.is_dir());
        assert!(Receipt::load(&prefix).unwrap().is_none());
    }

    #[test]
    fn test_failed_step_reports_unsuccessful_finish() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let (bytes, sha) = hello_tarball();
        let transport = MockTransport::new().with_body(SOURCE, bytes);
        let mut recipe: Recipe = minimal_recipe_toml(SOURCE, &sha).parse().unwrap();
        recipe.steps.push(crate::core::recipe::BuildStep {
            action: crate::core::recipe::StepAction::Custom {
                program: "false".into(),
                args: vec![],
            },
            when: Default::default(),
        });

        let finished = RefCell::new(None);
        let reporter = |e: &PipelineEvent| {
            if let PipelineEvent::Finished { success, .. } = e {
                *finished.borrow_mut() = Some(*success);
            }
        };

        let options = InstallOptions {
            platform: linux(),
            prefix: Some(tmp.path().join("prefix")),
            ..Default::default()
        };
        let err = install(&recipe, &options, &ctx, &transport, &reporter).unwrap_err();

        assert!(matches!(err, PipelineError::BuildStep { index: 1, .. }));
        assert_eq!(*finished.borrow(), Some(false));
    }
}
