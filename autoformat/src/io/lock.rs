//! Exclusive ownership of a working tree for the duration of a run.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "autoformat.lock";

/// Lock file held while a pipeline mutates a working tree.
///
/// Created with create-new semantics; removed on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Acquire `<git_dir>/autoformat.lock`, failing if another run holds it.
    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let path = git_dir.join(LOCK_FILE_NAME);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(anyhow!(
                    "working tree is locked by another run ({}): {}",
                    path.display(),
                    holder.trim()
                ));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create lock {}", path.display()));
            }
        };
        let lock = Self { path };
        writeln!(file, "pid={}", std::process::id())
            .with_context(|| format!("write lock {}", lock.path.display()))?;
        debug!(path = %lock.path.display(), "acquired workspace lock");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %err, "failed to remove workspace lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_released() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = WorkspaceLock::acquire(temp.path()).expect("first");
        let err = WorkspaceLock::acquire(temp.path()).expect_err("second");
        assert!(err.to_string().contains("locked by another run"));

        drop(first);
        assert!(!temp.path().join(LOCK_FILE_NAME).exists());
        WorkspaceLock::acquire(temp.path()).expect("after release");
    }
}
