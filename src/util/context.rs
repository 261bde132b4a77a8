//! Global context for Kiln operations.
//!
//! Provides centralized access to configuration, paths, and environment.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};

use crate::util::config::{load_config, Config};

/// Environment variable that overrides the Kiln home directory.
pub const KILN_HOME_ENV: &str = "KILN_HOME";

/// Project directories for Kiln
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("dev", "kiln", "kiln"));

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Home directory for global Kiln data
    home: PathBuf,

    /// Merged global + project configuration
    config: Config,

    /// Whether to use verbose output
    verbose: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext with defaults.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(Self::with_home(cwd, default_home()))
    }

    /// Create a GlobalContext rooted at explicit directories.
    pub fn with_home(cwd: PathBuf, home: PathBuf) -> Self {
        let config = load_config(
            &home.join("config.toml"),
            &cwd.join(".kiln").join("config.toml"),
        );

        GlobalContext {
            cwd,
            home,
            config,
            verbose: false,
        }
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the Kiln home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Get the merged configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the download cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.config
            .paths
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.home.join("cache"))
    }

    /// Get the root for default install prefixes.
    pub fn cellar_dir(&self) -> PathBuf {
        self.config
            .paths
            .cellar
            .clone()
            .unwrap_or_else(|| self.home.join("cellar"))
    }

    /// Get the root for per-run work directories.
    pub fn work_root(&self) -> PathBuf {
        self.home.join("work")
    }

    /// Default install prefix for a package.
    pub fn default_prefix(&self, name: &str, pkg_version: &str) -> PathBuf {
        self.cellar_dir().join(name).join(pkg_version)
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Ensure a directory exists, creating it if necessary.
    pub fn ensure_dir(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::create_dir_all(path)
                .with_context(|| format!("failed to create directory: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Resolve the Kiln home directory.
///
/// `KILN_HOME` wins, then the platform cache directory, then `~/.kiln`.
fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os(KILN_HOME_ENV) {
        return PathBuf::from(home);
    }

    if let Some(dirs) = PROJECT_DIRS.as_ref() {
        return dirs.cache_dir().to_path_buf();
    }

    BaseDirs::new()
        .map(|b| b.home_dir().join(".kiln"))
        .unwrap_or_else(|| PathBuf::from(".kiln"))
}
