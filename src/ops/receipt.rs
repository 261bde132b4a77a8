//! Install receipt.
//!
//! Every successful install writes `<prefix>/.kiln/receipt.json` recording
//! where the build came from and what was done to it.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::builder::patch::AppliedPatch;
use crate::builder::relocate::Relocations;
use crate::core::platform::Platform;
use crate::core::recipe::Recipe;

/// Receipt format version.
pub const RECEIPT_VERSION: u32 = 1;

/// Provenance of an installed prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub version: u32,
    pub name: String,
    pub pkg_version: String,
    pub source: SourceRecord,
    #[serde(default)]
    pub patches: Vec<AppliedPatch>,
    /// Names of the resources that were staged.
    #[serde(default)]
    pub resources: Vec<String>,
    pub platform: Platform,
    /// Configure flags after predicate filtering and expansion.
    #[serde(default)]
    pub configure_flags: Vec<String>,
    #[serde(default)]
    pub relocations: Relocations,
    /// Seconds since the Unix epoch.
    pub installed_at: u64,
    pub built_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub sha256: String,
}

impl Receipt {
    pub fn new(recipe: &Recipe, platform: &Platform) -> Self {
        let installed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Receipt {
            version: RECEIPT_VERSION,
            name: recipe.name.clone(),
            pkg_version: recipe.pkg_version(),
            source: SourceRecord {
                url: recipe.source.url.clone(),
                sha256: recipe.source.sha256.to_ascii_lowercase(),
            },
            patches: Vec::new(),
            resources: Vec::new(),
            platform: platform.clone(),
            configure_flags: Vec::new(),
            relocations: Relocations::default(),
            installed_at,
            built_by: format!("kiln {}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Where the receipt of `prefix` lives.
    pub fn path(prefix: &Path) -> PathBuf {
        prefix.join(".kiln").join("receipt.json")
    }

    /// Load the receipt of `prefix`, if there is one.
    pub fn load(prefix: &Path) -> Result<Option<Receipt>> {
        let path = Self::path(prefix);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read receipt: {}", path.display()))?;
        let receipt: Receipt = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse receipt: {}", path.display()))?;

        if receipt.version > RECEIPT_VERSION {
            anyhow::bail!(
                "receipt version {} is newer than this version of kiln supports",
                receipt.version
            );
        }

        Ok(Some(receipt))
    }

    pub fn save(&self, prefix: &Path) -> Result<PathBuf> {
        let path = Self::path(prefix);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("failed to serialize receipt")?;
        std::fs::write(&path, json + "\n")
            .with_context(|| format!("failed to write receipt: {}", path.display()))?;

        Ok(path)
    }
}
