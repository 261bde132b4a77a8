//! Configuration file support for Kiln.
//!
//! Kiln supports two configuration file locations:
//! - Global: `<kiln home>/config.toml` - User-wide defaults
//! - Project: `.kiln/config.toml` - Overrides for the current directory
//!
//! Project config takes precedence over global config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Kiln configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory overrides
    pub paths: PathsConfig,

    /// Build settings
    pub build: BuildConfig,

    /// Network settings
    pub fetch: FetchConfig,

    /// Acceptance test settings
    pub test: TestConfig,
}

/// Directory overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Download cache directory
    pub cache_dir: Option<PathBuf>,

    /// Root under which default install prefixes are created
    pub cellar: Option<PathBuf>,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Parallel jobs passed to the build driver (None = number of CPUs)
    pub jobs: Option<usize>,

    /// Build driver program (default: `make`)
    pub make: Option<String>,

    /// Keep the work directory after a build
    #[serde(default)]
    pub keep_work: bool,
}

/// Network-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent sent with downloads
    pub user_agent: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Acceptance test configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Upper bound on the readiness probe, in seconds
    pub probe_timeout_secs: Option<u64>,

    /// Delay between readiness probe attempts, in milliseconds
    pub probe_interval_ms: Option<u64>,

    /// Upper bound on introspection and client commands, in seconds
    pub command_timeout_secs: Option<u64>,
}

impl TestConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.unwrap_or(30))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.unwrap_or(100))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.unwrap_or(60))
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(300))
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file doesn't exist
    /// or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.paths.cache_dir.is_some() {
            self.paths.cache_dir = other.paths.cache_dir;
        }
        if other.paths.cellar.is_some() {
            self.paths.cellar = other.paths.cellar;
        }
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.make.is_some() {
            self.build.make = other.build.make;
        }
        if other.build.keep_work {
            self.build.keep_work = true;
        }
        if other.fetch.user_agent.is_some() {
            self.fetch.user_agent = other.fetch.user_agent;
        }
        if other.fetch.timeout_secs.is_some() {
            self.fetch.timeout_secs = other.fetch.timeout_secs;
        }
        if other.test.probe_timeout_secs.is_some() {
            self.test.probe_timeout_secs = other.test.probe_timeout_secs;
        }
        if other.test.probe_interval_ms.is_some() {
            self.test.probe_interval_ms = other.test.probe_interval_ms;
        }
        if other.test.command_timeout_secs.is_some() {
            self.test.command_timeout_secs = other.test.command_timeout_secs;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.kiln/config.toml)
/// 2. Global config (<kiln home>/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}
