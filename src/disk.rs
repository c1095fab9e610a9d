//! File plumbing shared by containers and row stores: `.x` path
//! resolution, advisory locks and atomic replacement.

use crate::container::SESSION_ID;
use crate::error::{Result, XError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Extension of every container and row store file.
pub const X_EXTENSION: &str = "x";

const LOCK_SUFFIX: &str = ".lock";

/// Resolve the `.x` file for a logical id inside `dir`.
///
/// ```
/// use xformat::resolve_path;
/// use std::path::Path;
///
/// assert_eq!(resolve_path(Path::new("data"), "brain"), Path::new("data/brain.x"));
/// assert_eq!(resolve_path(Path::new("data"), "brain.x"), Path::new("data/brain.x"));
/// ```
pub fn resolve_path(dir: &Path, id: &str) -> PathBuf {
    if id.ends_with(".x") {
        dir.join(id)
    } else {
        dir.join(format!("{id}.{X_EXTENSION}"))
    }
}

/// Ids name a single file: no separators, no parent references. The session
/// id is reserved for the persisted symbol table.
pub(crate) fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.ends_with(LOCK_SUFFIX)
        || id.strip_suffix(".x").unwrap_or(id) == SESSION_ID;
    if bad {
        return Err(XError::InvalidStoreId { id: id.to_string() });
    }
    Ok(())
}

/// Advisory lock on the sidecar `<file>.lock`.
///
/// The sidecar outlives atomic renames of the data file, so readers and
/// writers always contend on the same inode. Released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    pub(crate) fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()?;
        Ok(FileLock { file })
    }

    pub(crate) fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_shared()?;
        Ok(FileLock { file })
    }

    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(LOCK_SUFFIX);
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(PathBuf::from(lock_path))?)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Write `bytes` to a temp file next to `path`, fsync it, then rename it over
/// `path`. Readers see either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| XError::Io(e.error))?;
    Ok(())
}

/// Read a whole file under a shared lock.
///
/// A missing file is `NotFound` and leaves nothing behind: neither the lock
/// sidecar nor the parent directory is created for it.
pub(crate) fn read_locked(path: &Path, what: impl FnOnce() -> String) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(XError::not_found(what()));
    }
    let _lock = FileLock::shared(path)?;
    read_existing(path, what)
}

/// Read a whole file, mapping a missing file to `NotFound`.
pub(crate) fn read_existing(path: &Path, what: impl FnOnce() -> String) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(XError::not_found(what())),
        Err(e) => Err(e.into()),
    }
}
