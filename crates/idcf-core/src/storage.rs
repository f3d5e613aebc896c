//! File and directory lifecycle for downloads.
//!
//! Nothing is ever visible under a final name before it is complete: each
//! file is written to a `.part` sibling and renamed on success, and a whole
//! series is downloaded into a `.part` directory that is renamed only after
//! every file in it landed. This is what lets the validator trust that a
//! file with a final name was fully written.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temporary suffix used before atomic rename, for files and directories.
pub const TEMP_SUFFIX: &str = ".part";

/// Path of the temp sibling: appends `.part` to the final path.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Sequential writer for one in-flight file. Create, append, then
/// `finalize` to atomically give the file its final name.
pub struct PartFile {
    file: File,
    temp: PathBuf,
    written: u64,
}

impl PartFile {
    /// Create the `.part` sibling of `final_path`, truncating any stale one.
    pub fn create(final_path: &Path) -> std::io::Result<Self> {
        let temp = temp_path(final_path);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)?;
        Ok(Self {
            file,
            temp,
            written: 0,
        })
    }

    pub fn append(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Sync and atomically rename to `final_path`. Consumes the writer.
    pub fn finalize(self, final_path: &Path) -> std::io::Result<u64> {
        self.file.sync_all()?;
        drop(self.file);
        fs::rename(&self.temp, final_path)?;
        Ok(self.written)
    }

    /// Drop the temp file without finalizing (failed transfer).
    pub fn discard(self) {
        let temp = self.temp.clone();
        drop(self.file);
        let _ = fs::remove_file(temp);
    }
}

/// Prepare the `.part` staging directory for a series download. Removes any
/// stale staging left by a killed run and makes sure the parent exists.
pub fn stage_dir(final_dir: &Path) -> Result<PathBuf> {
    let staging = temp_path(final_dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("remove stale staging {}", staging.display()))?;
    }
    if let Some(parent) = final_dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create destination parent {}", parent.display()))?;
    }
    fs::create_dir_all(&staging)
        .with_context(|| format!("create staging {}", staging.display()))?;
    Ok(staging)
}

/// Atomically promote a fully-downloaded staging directory to its final
/// name, replacing any previous (necessarily stale) final directory.
pub fn promote_dir(staging: &Path, final_dir: &Path) -> Result<()> {
    if final_dir.exists() {
        fs::remove_dir_all(final_dir)
            .with_context(|| format!("remove stale destination {}", final_dir.display()))?;
    }
    fs::rename(staging, final_dir).with_context(|| {
        format!(
            "rename {} to {}",
            staging.display(),
            final_dir.display()
        )
    })?;
    Ok(())
}

/// Remove a staging directory after a failed transfer, keeping the
/// destination tree free of half-written series.
pub fn discard_dir(staging: &Path) {
    if staging.exists() {
        if let Err(e) = fs::remove_dir_all(staging) {
            tracing::warn!("could not remove staging {}: {}", staging.display(), e);
        }
    }
}
