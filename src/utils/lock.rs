//! Exclusive lock over an index output directory

use crate::error::{AssembleError, Result};
use fs2::FileExt as _;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// OS advisory lock on `<out>.lock`, held for the duration of an assembly.
///
/// The lock dies with the process, so a crashed run never blocks the next
/// one. The lock file itself stays behind and is reused.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
}

impl IndexLock {
    /// Lock file path for an output directory: `<out>.lock`
    pub fn path_for(out_dir: &Path) -> PathBuf {
        let mut name = out_dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".lock");
        out_dir.with_file_name(name)
    }

    /// Take the lock without waiting; a held lock is `LOCK_HELD`
    pub fn acquire(out_dir: &Path) -> Result<Self> {
        let path = Self::path_for(out_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AssembleError::io(parent, e))?;
        }

        // File locks do not reliably exclude other handles within one process
        if !held_in_process().insert(path.clone()) {
            return Err(AssembleError::LockHeld { path });
        }

        match Self::lock_file(&path) {
            Ok(file) => {
                tracing::debug!("Acquired index lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) => {
                held_in_process().remove(&path);
                Err(e)
            }
        }
    }

    fn lock_file(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| AssembleError::io(path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(AssembleError::LockHeld { path: path.to_path_buf() });
            }
            return Err(AssembleError::io(path, e));
        }

        // Owner pid, informational only
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|e| AssembleError::io(path, e))?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release index lock {}: {}", self.path.display(), e);
        }
        held_in_process().remove(&self.path);
    }
}

fn held_in_process() -> std::sync::MutexGuard<'static, HashSet<PathBuf>> {
    static HELD: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
