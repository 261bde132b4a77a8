//! Checksum-verified, content-addressed artifact fetching.
//!
//! Downloads land in `<cache>/downloads/<sha256>/<file name>`. Nothing is
//! written to the cache unless its digest matches the expected checksum, and
//! a cached file is re-hashed before it is handed out again.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::recipe::filename_from_url;
use crate::sources::transport::Transport;
use crate::util::fs as kfs;
use crate::util::hash::{sha256_bytes, sha256_file};

/// On-disk download cache.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    root: PathBuf,
}

/// A file in the download cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub sha256: String,
    pub filename: String,
    pub size: u64,
    pub path: PathBuf,
}

impl DownloadCache {
    pub fn new(cache_dir: &Path) -> Self {
        DownloadCache {
            root: cache_dir.join("downloads"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a download with this checksum and name is stored.
    pub fn path_for(&self, sha256: &str, filename: &str) -> PathBuf {
        self.root.join(sha256).join(filename)
    }

    /// Return the cached path if present and its digest still matches.
    ///
    /// A corrupted entry is removed so that it gets downloaded again.
    pub fn lookup(&self, sha256: &str, filename: &str) -> PipelineResult<Option<PathBuf>> {
        let path = self.path_for(sha256, filename);
        if !path.is_file() {
            return Ok(None);
        }

        let actual = sha256_file(&path)?;
        if actual == sha256 {
            return Ok(Some(path));
        }

        tracing::warn!(
            "cached file {} is corrupted (sha256 {}), discarding",
            path.display(),
            actual
        );
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        Ok(None)
    }

    /// Atomically store verified bytes.
    pub fn store(&self, sha256: &str, filename: &str, bytes: &[u8]) -> PipelineResult<PathBuf> {
        let dir = self.root.join(sha256);
        kfs::ensure_dir(&dir)?;

        let path = dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        tmp.write_all(bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to persist {}", path.display()))?;

        Ok(path)
    }

    /// Every cached download, sorted by path.
    pub fn entries(&self) -> anyhow::Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }

        for rel in kfs::list_files(&self.root)? {
            let mut parts = rel.iter();
            let (Some(sha), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            let path = self.root.join(&rel);
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            entries.push(CacheEntry {
                sha256: sha.to_string_lossy().into_owned(),
                filename: name.to_string_lossy().into_owned(),
                size,
                path,
            });
        }

        Ok(entries)
    }

    /// Remove every cached download. Returns the number of bytes freed.
    pub fn clean(&self) -> anyhow::Result<u64> {
        let size = kfs::dir_size(&self.root);
        kfs::remove_dir_all_if_exists(&self.root)?;
        Ok(size)
    }
}

/// Fetches artifacts through a transport into the download cache.
pub struct Fetcher<'a> {
    cache: DownloadCache,
    transport: &'a dyn Transport,
}

impl<'a> Fetcher<'a> {
    pub fn new(cache_dir: &Path, transport: &'a dyn Transport) -> Self {
        Fetcher {
            cache: DownloadCache::new(cache_dir),
            transport,
        }
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    /// Fetch `url`, verify it against `expected_sha256` and return the local path.
    ///
    /// Repeated calls with the same checksum are served from the cache
    /// without touching the transport.
    pub fn fetch(&self, url: &str, expected_sha256: &str) -> PipelineResult<PathBuf> {
        let filename = filename_from_url(url, "download");
        self.fetch_as(url, expected_sha256, &filename)
    }

    /// Like [`Fetcher::fetch`] with an explicit cache file name.
    pub fn fetch_as(
        &self,
        url: &str,
        expected_sha256: &str,
        filename: &str,
    ) -> PipelineResult<PathBuf> {
        let expected = expected_sha256.to_ascii_lowercase();

        if let Some(path) = self.cache.lookup(&expected, filename)? {
            tracing::debug!("cache hit for {} at {}", url, path.display());
            return Ok(path);
        }

        tracing::info!("Downloading {}", url);
        let bytes = self.transport.get(url)?;

        let actual = sha256_bytes(&bytes);
        if actual != expected {
            return Err(PipelineError::Integrity {
                url: url.to_string(),
                expected,
                actual,
            });
        }

        tracing::debug!("verified {} ({} bytes)", url, bytes.len());
        self.cache.store(&expected, filename, &bytes)
    }
}
