//! Source archive extraction.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;

use crate::util::fs as kfs;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Unpack a `.tar.gz` or plain `.tar` archive into `dest`.
///
/// Returns the source root: the single top-level directory if the archive
/// has one (the usual `name-version/` layout), otherwise `dest` itself.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let mut file = File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;

    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    kfs::ensure_dir(dest)?;

    let reader = BufReader::new(file);
    if n == 2 && magic == GZIP_MAGIC {
        unpack(Archive::new(GzDecoder::new(reader)), dest)
    } else {
        unpack(Archive::new(reader), dest)
    }
    .with_context(|| format!("failed to extract {}", archive.display()))?;

    Ok(kfs::single_subdir(dest)?.unwrap_or_else(|| dest.to_path_buf()))
}

fn unpack<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);

    let mut count = 0usize;
    for entry in archive.entries().context("failed to read archive entries")? {
        let mut entry = entry.context("failed to read archive entry")?;
        let entry_path = entry.path().context("failed to get entry path")?.into_owned();

        if entry_path.is_absolute()
            || entry_path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            bail!(
                "archive entry escapes destination directory: {}",
                entry_path.display()
            );
        }

        entry
            .unpack_in(dest)
            .with_context(|| format!("failed to unpack {}", entry_path.display()))?;
        count += 1;
    }

    if count == 0 {
        bail!("archive is empty or not a tar archive");
    }

    tracing::debug!("extracted {} entries into {}", count, dest.display());
    Ok(())
}
