//! Post-install relocation.
//!
//! Renames installed files to `prefix + name` so they do not shadow system
//! binaries of the same name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::platform::Platform;
use crate::core::recipe::RelocationMap;

/// One rename, relative to the install prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// The renames in effect for an install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Relocations(Vec<Relocation>);

impl Relocations {
    /// Renames that `map` calls for on `platform`, without touching disk.
    pub fn plan(map: Option<&RelocationMap>, platform: &Platform) -> Self {
        let Some(map) = map else {
            return Relocations::default();
        };

        if !map.when.matches(platform) {
            return Relocations::default();
        }

        let entries = map
            .entries
            .iter()
            .filter(|e| e.when.matches(platform))
            .map(|e| {
                let dir = Path::new(&e.dir);
                Relocation {
                    from: dir.join(&e.name),
                    to: dir.join(format!("{}{}", map.prefix, e.name)),
                }
            })
            .collect();

        Relocations(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relocation> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Map an original relative path to where it lives after relocation.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.0
            .iter()
            .find(|r| r.from == path)
            .map(|r| r.to.clone())
            .unwrap_or_else(|| path.to_path_buf())
    }
}

/// Apply the relocation map under `prefix`.
///
/// Every source file is checked before anything is renamed, so a missing
/// file leaves the prefix unchanged.
pub fn relocate(
    map: Option<&RelocationMap>,
    platform: &Platform,
    prefix: &Path,
) -> PipelineResult<Relocations> {
    let plan = Relocations::plan(map, platform);

    for r in plan.iter() {
        let from = prefix.join(&r.from);
        if !from.exists() {
            return Err(PipelineError::Relocation { path: from });
        }
    }

    for r in plan.iter() {
        let from = prefix.join(&r.from);
        let to = prefix.join(&r.to);
        tracing::debug!("renaming {} -> {}", from.display(), to.display());
        std::fs::rename(&from, &to).map_err(|e| {
            anyhow::Error::from(e).context(format!(
                "failed to rename {} to {}",
                from.display(),
                to.display()
            ))
        })?;
    }

    Ok(plan)
}
