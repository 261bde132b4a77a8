//! Build step execution.
//!
//! Steps run strictly in order in one working directory. The first step that
//! exits non-zero stops the run; nothing after it is executed and nothing is
//! retried. Steps whose platform predicate is false are reported as skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::builder::events::{PipelineEvent, Reporter};
use crate::core::env::EnvOverlay;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::platform::Platform;
use crate::core::recipe::{BuildStep, FlagSpec, StepAction, StepKind};
use crate::util::process::{combined_output, ProcessBuilder};
use crate::util::template::Vars;

/// Result of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub kind: StepKind,
    pub command: String,
    pub skipped: bool,
    #[serde(rename = "duration_ms", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    #[serde(skip)]
    pub output: String,
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ResolvedCommand {
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Runs build steps against one working directory.
pub struct StepRunner<'a> {
    cwd: &'a Path,
    vars: &'a Vars,
    platform: &'a Platform,
    base_env: &'a BTreeMap<String, String>,
    make: &'a str,
    reporter: &'a dyn Reporter,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        cwd: &'a Path,
        vars: &'a Vars,
        platform: &'a Platform,
        base_env: &'a BTreeMap<String, String>,
        reporter: &'a dyn Reporter,
    ) -> Self {
        StepRunner {
            cwd,
            vars,
            platform,
            base_env,
            make: "make",
            reporter,
        }
    }

    /// Use a different build driver for compile and install steps.
    pub fn make(mut self, make: &'a str) -> Self {
        self.make = make;
        self
    }

    /// Resolve a step's program and arguments for this platform.
    pub fn resolve(&self, action: &StepAction) -> PipelineResult<ResolvedCommand> {
        let (program, args) = match action {
            StepAction::Configure { script, flags } => {
                let flags: Vec<String> = flags
                    .iter()
                    .filter(|f| f.applies_to(self.platform))
                    .map(FlagSpec::flag)
                    .map(|f| self.vars.expand(f))
                    .collect::<anyhow::Result<_>>()?;
                (self.vars.expand(script)?, flags)
            }
            StepAction::Compile { args } => (self.make.to_string(), self.vars.expand_all(args)?),
            StepAction::Install { args } => {
                let mut all = vec!["install".to_string()];
                all.extend(self.vars.expand_all(args)?);
                (self.make.to_string(), all)
            }
            StepAction::Custom { program, args } => {
                (self.vars.expand(program)?, self.vars.expand_all(args)?)
            }
        };

        Ok(ResolvedCommand { program, args })
    }

    /// Run `steps` in order with `overlay` applied to the environment.
    pub fn run(&self, steps: &[BuildStep], overlay: &EnvOverlay) -> PipelineResult<Vec<StepOutcome>> {
        let env = self.resolve_env(overlay)?;
        let mut outcomes = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let kind = step.action.kind();

            if !step.when.matches(self.platform) {
                tracing::debug!("skipping step {} ({}): {} does not hold", index, kind, step.when);
                self.reporter.report(&PipelineEvent::StepFinished {
                    index,
                    kind,
                    skipped: true,
                    duration_ms: 0,
                });
                outcomes.push(StepOutcome {
                    index,
                    kind,
                    command: String::new(),
                    skipped: true,
                    duration: Duration::ZERO,
                    output: String::new(),
                });
                continue;
            }

            let command = self.resolve(&step.action)?;
            let shown = command.display();
            tracing::debug!("step {} ({}): {}", index, kind, shown);
            self.reporter.report(&PipelineEvent::StepStarted {
                index,
                kind,
                command: shown.clone(),
            });

            let start = Instant::now();
            let output = ProcessBuilder::new(self.program_path(&command.program))
                .args(&command.args)
                .envs(&env)
                .cwd(self.cwd)
                .exec()
                .map_err(|e| PipelineError::BuildStep {
                    index,
                    command: shown.clone(),
                    exit_code: None,
                    output: format!("{:#}", e),
                })?;

            let text = combined_output(&output);
            if !output.status.success() {
                return Err(PipelineError::BuildStep {
                    index,
                    command: shown,
                    exit_code: output.status.code(),
                    output: text,
                });
            }

            let duration = start.elapsed();
            self.reporter.report(&PipelineEvent::StepFinished {
                index,
                kind,
                skipped: false,
                duration_ms: duration.as_millis() as u64,
            });
            outcomes.push(StepOutcome {
                index,
                kind,
                command: shown,
                skipped: false,
                duration,
                output: text,
            });
        }

        Ok(outcomes)
    }

    fn resolve_env(&self, overlay: &EnvOverlay) -> PipelineResult<BTreeMap<String, String>> {
        let expanded = overlay
            .edits()
            .iter()
            .try_fold(EnvOverlay::new(), |acc, edit| {
                self.vars
                    .expand(&edit.value)
                    .map(|value| acc.with(edit.var.clone(), edit.op, value))
            })?;
        Ok(expanded.changes(self.base_env))
    }

    /// Relative programs with a directory part (`./configure`) are resolved
    /// against the working directory; bare names go through `PATH`.
    fn program_path(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.is_relative() && path.components().count() > 1 {
            self.cwd.join(path)
        } else {
            path.to_path_buf()
        }
    }
}
