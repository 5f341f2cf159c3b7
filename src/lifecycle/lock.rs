use crate::lifecycle::sibling_path;
use crate::{CrawlDbError, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Exclusive per-store lock held for the duration of one operation
///
/// The lock is a `<store>.lock` file created with `create_new`, so a second
/// process or operation sees it and backs off. Dropping the guard removes
/// the file.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Path of the lock file guarding `store`
    pub fn path_for(store: &Path) -> PathBuf {
        sibling_path(store, ".lock")
    }

    /// Takes the lock, failing with `StoreBusy` if it is already held
    pub fn acquire(store: &Path) -> Result<Self> {
        if let Some(parent) = store.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let path = Self::path_for(store);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!("Store lock {} is held", path.display());
                return Err(CrawlDbError::StoreBusy(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!("Acquired store lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release store lock {}: {}", self.path.display(), e);
        }
    }
}
