//! Recipe parsing and schema.
//!
//! A recipe is a TOML file describing how to fetch, patch, build, install,
//! relocate and test one package. It is validated once on load and never
//! modified afterwards.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::acceptance::{check_relative, AcceptanceSpec};
use crate::core::env::EnvOp;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::platform::{parse_lenient_version, Platform, PlatformPredicate};
use crate::util::hash::is_sha256_hex;
use crate::util::template::Vars;

/// A package recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    pub name: String,
    pub version: String,

    /// Bumped when the recipe changes without a new upstream version.
    #[serde(default)]
    pub revision: u32,

    #[serde(default)]
    pub desc: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    pub source: Source,

    #[serde(default)]
    pub depends_on: DependsOn,

    /// Prebuilt artifact checksums keyed by platform tag.
    #[serde(default)]
    pub bottles: BTreeMap<String, String>,

    #[serde(default)]
    pub livecheck: Option<Livecheck>,

    #[serde(default)]
    pub resources: Vec<Resource>,

    #[serde(default)]
    pub patches: Vec<Patch>,

    /// Environment edits applied to every main build step.
    #[serde(default)]
    pub env: Vec<EnvEntry>,

    pub steps: Vec<BuildStep>,

    #[serde(default)]
    pub relocate: Option<RelocationMap>,

    #[serde(default)]
    pub caveats: Option<Caveats>,

    #[serde(default)]
    pub test: Option<AcceptanceSpec>,
}

/// Main source archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    pub url: String,
    pub sha256: String,
}

/// Dependency names. Metadata only; they are reported, not resolved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependsOn {
    pub build: Vec<String>,
    pub runtime: Vec<String>,
}

/// Where to look for newer upstream versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Livecheck {
    pub url: String,
    /// Capture group 1 of every match is a candidate version.
    pub regex: String,
}

/// An auxiliary build-time dependency staged into a private prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    pub name: String,
    pub url: String,
    pub sha256: String,

    #[serde(default)]
    pub when: PlatformPredicate,

    #[serde(default)]
    pub steps: Vec<BuildStep>,

    /// Variables exported to the main build, relative to the private prefix.
    #[serde(default)]
    pub exports: Vec<Export>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Export {
    pub var: String,
    pub path: String,
    #[serde(default = "default_export_op")]
    pub op: EnvOp,
}

fn default_export_op() -> EnvOp {
    EnvOp::PrependPath
}

/// A source patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    pub url: String,
    pub sha256: String,

    /// Leading path components stripped (`patch -p<strip>`).
    #[serde(default = "default_strip")]
    pub strip: u32,

    #[serde(default)]
    pub when: PlatformPredicate,
}

fn default_strip() -> u32 {
    1
}

/// A recipe-level environment edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvEntry {
    pub var: String,
    pub op: EnvOp,
    pub value: String,
    #[serde(default)]
    pub when: PlatformPredicate,
}

/// One build step: an action plus an optional platform condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StepTable")]
pub struct BuildStep {
    #[serde(flatten)]
    pub action: StepAction,

    #[serde(default, skip_serializing_if = "PlatformPredicate::is_always")]
    pub when: PlatformPredicate,
}

/// A `[[steps]]` table as written, before checking which keys its kind
/// accepts.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StepTable {
    kind: StepKind,
    script: Option<String>,
    flags: Option<Vec<FlagSpec>>,
    program: Option<String>,
    args: Option<Vec<String>>,
    #[serde(default)]
    when: PlatformPredicate,
}

impl TryFrom<StepTable> for BuildStep {
    type Error = String;

    fn try_from(t: StepTable) -> Result<Self, String> {
        let kind = t.kind;
        let reject = |key: &str, present: bool| {
            if present {
                Err(format!("`{}` is not allowed on a {} step", key, kind))
            } else {
                Ok(())
            }
        };

        let action = match kind {
            StepKind::Configure => {
                reject("program", t.program.is_some())?;
                reject("args", t.args.is_some())?;
                StepAction::Configure {
                    script: t.script.unwrap_or_else(default_configure_script),
                    flags: t.flags.unwrap_or_default(),
                }
            }
            StepKind::Compile | StepKind::Install => {
                reject("script", t.script.is_some())?;
                reject("flags", t.flags.is_some())?;
                reject("program", t.program.is_some())?;
                let args = t.args.unwrap_or_default();
                if kind == StepKind::Compile {
                    StepAction::Compile { args }
                } else {
                    StepAction::Install { args }
                }
            }
            StepKind::Custom => {
                reject("script", t.script.is_some())?;
                reject("flags", t.flags.is_some())?;
                StepAction::Custom {
                    program: t
                        .program
                        .ok_or_else(|| "a custom step needs `program`".to_string())?,
                    args: t.args.unwrap_or_default(),
                }
            }
        };

        Ok(BuildStep {
            action,
            when: t.when,
        })
    }
}

/// What a build step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepAction {
    /// Run the configure script with the platform-filtered flag list.
    Configure {
        #[serde(default = "default_configure_script")]
        script: String,
        #[serde(default)]
        flags: Vec<FlagSpec>,
    },
    /// Run the build driver.
    Compile {
        #[serde(default)]
        args: Vec<String>,
    },
    /// Run the build driver's `install` target.
    Install {
        #[serde(default)]
        args: Vec<String>,
    },
    /// Run an arbitrary program.
    Custom {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_configure_script() -> String {
    "./configure".to_string()
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Configure { .. } => StepKind::Configure,
            StepAction::Compile { .. } => StepKind::Compile,
            StepAction::Install { .. } => StepKind::Install,
            StepAction::Custom { .. } => StepKind::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Configure,
    Compile,
    Install,
    Custom,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepKind::Configure => "configure",
            StepKind::Compile => "compile",
            StepKind::Install => "install",
            StepKind::Custom => "custom",
        })
    }
}

/// A configure flag, optionally gated on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagSpec {
    Plain(String),
    Conditional {
        flag: String,
        when: PlatformPredicate,
    },
}

impl FlagSpec {
    pub fn flag(&self) -> &str {
        match self {
            FlagSpec::Plain(flag) | FlagSpec::Conditional { flag, .. } => flag,
        }
    }

    pub fn applies_to(&self, platform: &Platform) -> bool {
        match self {
            FlagSpec::Plain(_) => true,
            FlagSpec::Conditional { when, .. } => when.matches(platform),
        }
    }
}

/// Post-install renames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelocationMap {
    /// Prepended to every renamed file.
    pub prefix: String,

    #[serde(default)]
    pub when: PlatformPredicate,

    pub entries: Vec<RelocationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelocationEntry {
    /// Directory relative to the install prefix (`bin`, `sbin`).
    pub dir: String,
    pub name: String,
    #[serde(default)]
    pub when: PlatformPredicate,
}

/// Post-install notes for the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Caveats {
    pub text: String,
    #[serde(default)]
    pub when: PlatformPredicate,
}

impl FromStr for Recipe {
    type Err = PipelineError;

    fn from_str(s: &str) -> PipelineResult<Self> {
        let recipe: Recipe =
            toml::from_str(s).map_err(|e| PipelineError::recipe(e.to_string()))?;
        recipe.validate().map_err(PipelineError::recipe)?;
        Ok(recipe)
    }
}

impl Recipe {
    /// Load and validate a recipe file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::recipe(format!("failed to read {}: {}", path.display(), e))
        })?;

        contents.parse::<Recipe>().map_err(|e| match e {
            PipelineError::Recipe { message } => {
                PipelineError::recipe(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// `version`, or `version_revision` when the revision is non-zero.
    pub fn pkg_version(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.version, self.revision)
        } else {
            self.version.clone()
        }
    }

    /// File name of the source archive, taken from the last URL segment.
    pub fn source_filename(&self) -> String {
        filename_from_url(&self.source.url, &format!("{}-{}", self.name, self.version))
    }

    /// Configure flags that apply to `platform`, in declared order, unexpanded.
    pub fn configure_flags(&self, platform: &Platform) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.when.matches(platform))
            .flat_map(|s| match &s.action {
                StepAction::Configure { flags, .. } => flags
                    .iter()
                    .filter(|f| f.applies_to(platform))
                    .map(FlagSpec::flag)
                    .collect::<Vec<_>>(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Resources whose predicate holds on `platform`.
    pub fn active_resources<'a>(&'a self, platform: &'a Platform) -> impl Iterator<Item = &'a Resource> {
        self.resources.iter().filter(|r| r.when.matches(platform))
    }

    /// Template variables for the main build.
    pub fn build_vars(&self, prefix: &Path, buildpath: &Path, jobs: usize) -> Vars {
        Vars::new()
            .with("name", &self.name)
            .with("version", &self.version)
            .with("pkg_version", self.pkg_version())
            .with_path("prefix", prefix)
            .with_path("bin", &prefix.join("bin"))
            .with_path("sbin", &prefix.join("sbin"))
            .with_path("lib", &prefix.join("lib"))
            .with_path("buildpath", buildpath)
            .with("jobs", jobs.to_string())
    }

    /// Check the recipe for structural errors.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("`name` must not be empty".to_string());
        }
        if parse_lenient_version(&self.version).is_none() {
            return Err(format!("`version` `{}` is not a dotted version", self.version));
        }

        check_url("source.url", &self.source.url)?;
        check_sha("source.sha256", &self.source.sha256)?;

        if let Some(ref homepage) = self.homepage {
            check_url("homepage", homepage)?;
        }

        for (tag, sha) in &self.bottles {
            check_sha(&format!("bottles.{}", tag), sha)?;
        }

        if let Some(ref livecheck) = self.livecheck {
            check_url("livecheck.url", &livecheck.url)?;
            let re = Regex::new(&livecheck.regex)
                .map_err(|e| format!("livecheck.regex is invalid: {}", e))?;
            if re.captures_len() < 2 {
                return Err("livecheck.regex needs a capture group for the version".to_string());
            }
        }

        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.name.as_str()) {
                return Err(format!("duplicate resource `{}`", resource.name));
            }
            let field = format!("resources.{}", resource.name);
            check_url(&format!("{}.url", field), &resource.url)?;
            check_sha(&format!("{}.sha256", field), &resource.sha256)?;
            resource.when.validate()?;
            check_steps(&field, &resource.steps)?;
            for export in &resource.exports {
                check_relative(&format!("{}.exports.{}", field, export.var), &export.path)?;
            }
        }

        for (i, patch) in self.patches.iter().enumerate() {
            check_url(&format!("patches[{}].url", i), &patch.url)?;
            check_sha(&format!("patches[{}].sha256", i), &patch.sha256)?;
            patch.when.validate()?;
        }

        for entry in &self.env {
            if entry.var.trim().is_empty() {
                return Err("env entry with an empty variable name".to_string());
            }
            entry.when.validate()?;
        }

        if self.steps.is_empty() {
            return Err("`steps` must contain at least one step".to_string());
        }
        check_steps("steps", &self.steps)?;

        if let Some(ref relocate) = self.relocate {
            if relocate.prefix.is_empty() {
                return Err("relocate.prefix must not be empty".to_string());
            }
            relocate.when.validate()?;
            for entry in &relocate.entries {
                check_relative("relocate.entries.dir", &entry.dir)?;
                if entry.name.is_empty() || entry.name.contains('/') {
                    return Err(format!(
                        "relocate entry name `{}` must be a plain file name",
                        entry.name
                    ));
                }
                entry.when.validate()?;
            }
        }

        if let Some(ref caveats) = self.caveats {
            caveats.when.validate()?;
        }

        if let Some(ref test) = self.test {
            test.validate()?;
        }

        Ok(())
    }
}

fn check_steps(field: &str, steps: &[BuildStep]) -> Result<(), String> {
    for (i, step) in steps.iter().enumerate() {
        step.when.validate()?;
        match &step.action {
            StepAction::Custom { program, .. } if program.trim().is_empty() => {
                return Err(format!("{}[{}]: custom step has an empty program", field, i));
            }
            StepAction::Configure { script, flags } => {
                if script.trim().is_empty() {
                    return Err(format!("{}[{}]: configure script is empty", field, i));
                }
                for flag in flags {
                    if let FlagSpec::Conditional { when, .. } = flag {
                        when.validate()?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_url(field: &str, url: &str) -> Result<(), String> {
    Url::parse(url)
        .map(|_| ())
        .map_err(|e| format!("{} `{}` is not a valid URL: {}", field, url, e))
}

fn check_sha(field: &str, sha: &str) -> Result<(), String> {
    if is_sha256_hex(sha) {
        Ok(())
    } else {
        Err(format!(
            "{} must be a 64-character hex SHA-256, got `{}`",
            field, sha
        ))
    }
}

/// Last non-empty path segment of a URL, or `fallback`.
///
/// Query-only URLs such as `attachment.cgi?id=16579` fall back to the
/// segment plus the query value so distinct downloads get distinct names.
pub fn filename_from_url(url: &str, fallback: &str) -> String {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return fallback.to_string(),
    };

    let segment = parsed
        .path_segments()
        .and_then(|mut segs| segs.next_back().map(str::to_string))
        .filter(|s| !s.is_empty());

    match (segment, parsed.query()) {
        (Some(seg), Some(q)) => {
            let q: String = q
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            format!("{}_{}", seg, q)
        }
        (Some(seg), None) => seg,
        (None, _) => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::Os;
    use crate::test_support::fixtures::{minimal_recipe_toml, SHA_A};

    #[test]
    fn test_parse_minimal() {
        let recipe: Recipe = minimal_recipe_toml("file:///tmp/hello-1.0.tar.gz", SHA_A)
            .parse()
            .unwrap();

        assert_eq!(recipe.name, "hello");
        assert_eq!(recipe.pkg_version(), "1.0");
        assert_eq!(recipe.source_filename(), "hello-1.0.tar.gz");
        assert_eq!(recipe.steps.len(), 1);
        assert_eq!(recipe.steps[0].action.kind(), StepKind::Custom);
    }

    #[test]
    fn test_pkg_version_with_revision() {
        let toml = format!(
            "revision = 1\n{}",
            minimal_recipe_toml("https://example.invalid/hello-1.0.tar.gz", SHA_A)
        );
        let recipe: Recipe = toml.parse().unwrap();
        assert_eq!(recipe.pkg_version(), "1.0_1");
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let err = minimal_recipe_toml("https://example.invalid/a.tar.gz", "abc")
            .parse::<Recipe>()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Recipe { .. }));
        assert!(err.to_string().contains("source.sha256"));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let toml = format!(
            "colour = \"blue\"\n{}",
            minimal_recipe_toml("https://example.invalid/a.tar.gz", SHA_A)
        );
        assert!(toml.parse::<Recipe>().is_err());
    }

    #[test]
    fn test_rejects_unknown_step_keys() {
        let base = minimal_recipe_toml("https://example.invalid/a.tar.gz", SHA_A);

        let typo = format!("{}\n[[steps]]\nkind = \"configure\"\nflag = [\"--x\"]\n", base);
        let err = typo.parse::<Recipe>().unwrap_err();
        assert!(err.to_string().contains("flag"), "{}", err);

        let misplaced = format!("{}\n[[steps]]\nkind = \"compile\"\nflags = [\"--x\"]\n", base);
        let err = misplaced.parse::<Recipe>().unwrap_err();
        assert!(err.to_string().contains("not allowed on a compile step"), "{}", err);

        let no_program = format!("{}\n[[steps]]\nkind = \"custom\"\n", base);
        assert!(no_program.parse::<Recipe>().is_err());

        let ok = format!(
            "{}\n[[steps]]\nkind = \"install\"\nargs = [\"DESTDIR=/tmp\"]\nwhen = {{ os = \"linux\" }}\n",
            base
        );
        let recipe: Recipe = ok.parse().unwrap();
        assert_eq!(
            recipe.steps[1].action,
            StepAction::Install {
                args: vec!["DESTDIR=/tmp".to_string()]
            }
        );
    }

    #[test]
    fn test_configure_flags_filtered_by_platform() {
        let toml = format!(
            r#"
name = "x"
version = "1.0"

[source]
url = "https://example.invalid/x-1.0.tar.gz"
sha256 = "{sha}"

[[steps]]
kind = "configure"
flags = [
    "--disable-cups",
    {{ flag = "--with-macos-only", when = {{ os = "macos" }} }},
    "--prefix={{prefix}}",
]

[[steps]]
kind = "compile"

[[steps]]
kind = "install"
when = {{ os = "linux" }}
"#,
            sha = SHA_A
        );
        let recipe: Recipe = toml.parse().unwrap();

        let linux = Platform::new(Os::Linux, None, "x86_64");
        let mac = Platform::new(Os::Macos, Some("12.0"), "aarch64");

        assert_eq!(
            recipe.configure_flags(&linux),
            vec!["--disable-cups", "--prefix={prefix}"]
        );
        assert_eq!(
            recipe.configure_flags(&mac),
            vec!["--disable-cups", "--with-macos-only", "--prefix={prefix}"]
        );
        assert_eq!(
            recipe.steps[0].action,
            StepAction::Configure {
                script: "./configure".into(),
                flags: vec![
                    FlagSpec::Plain("--disable-cups".into()),
                    FlagSpec::Conditional {
                        flag: "--with-macos-only".into(),
                        when: PlatformPredicate::os(Os::Macos),
                    },
                    FlagSpec::Plain("--prefix={prefix}".into()),
                ],
            }
        );
        assert!(recipe.steps[2].when.matches(&linux));
        assert!(!recipe.steps[2].when.matches(&mac));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://download.samba.org/pub/samba/stable/samba-4.14.7.tar.gz", "x"),
            "samba-4.14.7.tar.gz"
        );
        assert_eq!(
            filename_from_url("https://attachments.samba.org/attachment.cgi?id=16579", "x"),
            "attachment.cgi_id_16579"
        );
        assert_eq!(filename_from_url("https://example.invalid/", "fallback"), "fallback");
    }

    #[test]
    fn test_build_vars() {
        let recipe: Recipe = minimal_recipe_toml("https://example.invalid/a.tar.gz", SHA_A)
            .parse()
            .unwrap();
        let vars = recipe.build_vars(Path::new("/opt/hello"), Path::new("/work/src"), 4);

        assert_eq!(vars.get("sbin"), Some("/opt/hello/sbin"));
        assert_eq!(vars.get("jobs"), Some("4"));
        assert_eq!(
            vars.expand("-Wl,-rpath,{lib}/private").unwrap(),
            "-Wl,-rpath,/opt/hello/lib/private"
        );
    }

    const SAMBA: &str = include_str!("../../recipes/samba.toml");

    #[test]
    fn test_samba_recipe() {
        let recipe: Recipe = SAMBA.parse().unwrap();

        assert_eq!(recipe.pkg_version(), "4.14.7_1");
        assert_eq!(
            recipe.source.sha256,
            "6f50353f9602aa20245eb18ceb00e7e5ec793df0974aebd5254c38f16d8f1906"
        );
        assert_eq!(recipe.bottles.len(), 5);
        assert_eq!(recipe.depends_on.runtime, vec!["gnutls".to_string()]);

        let catalina = Platform::new(Os::Macos, Some("10.15.7"), "x86_64");
        let big_sur = Platform::new(Os::Macos, Some("11.6"), "x86_64");
        let linux = Platform::new(Os::Linux, Some("5.15"), "x86_64");

        assert_eq!(recipe.active_resources(&catalina).count(), 1);
        assert_eq!(recipe.active_resources(&big_sur).count(), 0);
        assert_eq!(recipe.active_resources(&linux).count(), 0);

        let flags = recipe.configure_flags(&linux);
        assert_eq!(flags.len(), 20);
        assert_eq!(flags.last(), Some(&"--prefix={prefix}"));
        assert!(flags.contains(&"--with-shared-modules=!vfs_snapper"));

        assert!(recipe.env[0].when.matches(&linux));
        assert!(!recipe.env[0].when.matches(&big_sur));

        let relocate = recipe.relocate.as_ref().unwrap();
        assert_eq!(relocate.entries.len(), 3);
        assert!(relocate.when.matches(&big_sur));

        let test = recipe.test.as_ref().unwrap();
        assert_eq!(test.binary, "sbin/smbd");
        assert_eq!(test.introspect.len(), 2);
        let config = test.config.as_ref().unwrap();
        assert_eq!(config.sections[0].name, "global");
        assert_eq!(config.sections[0].entries.len(), 16);
        assert_eq!(
            config.sections[1].entries[3],
            ("force user".to_string(), "{user}".to_string())
        );
    }
}
