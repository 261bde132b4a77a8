//! Acceptance test declarations.
//!
//! These are recipe data only; the runner lives in `ops::acceptance`.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// The `[test]` table of a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptanceSpec {
    /// Server binary, relative to the install prefix (before relocation).
    pub binary: String,

    /// Argument lists run against the binary before launch; each must exit 0.
    #[serde(default)]
    pub introspect: Vec<Vec<String>>,

    /// Scratch directories created under the test directory.
    #[serde(default)]
    pub dirs: Vec<String>,

    /// Files written under the test directory before launch.
    #[serde(default)]
    pub fixtures: Vec<Fixture>,

    /// Generated server configuration.
    #[serde(default)]
    pub config: Option<ConfigTemplate>,

    /// Server launch arguments.
    #[serde(default)]
    pub launch: Vec<String>,

    #[serde(default)]
    pub readiness: Readiness,

    pub client: ClientSpec,

    pub exchange: Exchange,
}

/// A file materialized in the test directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    pub path: String,
    pub content: String,
}

/// A key/value configuration file with ordered sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigTemplate {
    /// File name under the test directory; bound to `{config}`.
    #[serde(default = "default_config_path")]
    pub path: String,

    pub sections: Vec<ConfigSection>,
}

fn default_config_path() -> String {
    "server.conf".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    pub name: String,
    /// `[key, value]` pairs, written in order.
    #[serde(default)]
    pub entries: Vec<(String, String)>,
}

/// How to decide that the launched server is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Readiness {
    /// Retry a TCP connect to the port until it succeeds or the deadline passes.
    Probe {
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    /// Sleep for a fixed period.
    Grace { seconds: u64 },
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::Probe {
            timeout_secs: None,
            interval_ms: None,
        }
    }
}

/// The protocol client used for the round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClientSpec {
    /// An external client program; it must write the retrieved file itself.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// Port the client talks to instead of the server's port.
        #[serde(default)]
        port: Option<u16>,
    },
    /// A plain HTTP GET of `path`; the body is written to the retrieved path.
    Http {
        path: String,
        #[serde(default)]
        port: Option<u16>,
    },
}

impl ClientSpec {
    pub fn pinned_port(&self) -> Option<u16> {
        match self {
            ClientSpec::Command { port, .. } | ClientSpec::Http { port, .. } => *port,
        }
    }
}

/// What the round trip must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Exchange {
    /// Where the retrieved file ends up, relative to the test directory.
    pub retrieved: String,
    /// The fixture it must equal byte for byte.
    pub expected: String,
}

impl AcceptanceSpec {
    /// Check paths and cross references.
    pub fn validate(&self) -> Result<(), String> {
        check_relative("test.binary", &self.binary)?;
        for dir in &self.dirs {
            check_relative("test.dirs", dir)?;
        }
        for fixture in &self.fixtures {
            check_relative("test.fixtures", &fixture.path)?;
        }
        if let Some(ref config) = self.config {
            check_relative("test.config.path", &config.path)?;
            if config.sections.is_empty() {
                return Err("test.config has no sections".to_string());
            }
        }
        check_relative("test.exchange.retrieved", &self.exchange.retrieved)?;

        if !self
            .fixtures
            .iter()
            .any(|f| f.path == self.exchange.expected)
        {
            return Err(format!(
                "test.exchange.expected `{}` is not a declared fixture",
                self.exchange.expected
            ));
        }

        match &self.client {
            ClientSpec::Command { program, .. } if program.trim().is_empty() => {
                Err("test.client.program is empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Reject absolute paths and `..` components.
pub(crate) fn check_relative(field: &str, path: &str) -> Result<(), String> {
    let p = Path::new(path);
    if path.is_empty() || p.is_absolute() {
        return Err(format!("{} must be a relative path, got `{}`", field, path));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("{} must not contain `..`, got `{}`", field, path));
    }
    Ok(())
}
