//! File-based locking so two runs of the same syncer never overlap

use anyhow::{Context, Result};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive run lock for one syncer
pub struct SyncLock {
    // Guard and lock live in the same allocation; the guard field drops first
    _lock: Box<(RwLock<File>, Option<fd_lock::RwLockWriteGuard<'static, File>>)>,
    lock_path: PathBuf,
}

impl SyncLock {
    /// Acquire the lock for `syncer` in the system temp directory
    pub fn acquire(syncer: &str) -> Result<Self> {
        Self::acquire_in(&std::env::temp_dir(), syncer)
    }

    /// Acquire the lock for `syncer` inside `lock_dir`
    ///
    /// Fails immediately if another process (or another handle in this one)
    /// already holds it.
    pub fn acquire_in(lock_dir: &Path, syncer: &str) -> Result<Self> {
        let lock_path = lock_dir.join(format!("backup-sync-{}.lock", sanitize(syncer)));
        debug!("Attempting to acquire lock: {:?}", lock_path);

        std::fs::create_dir_all(lock_dir).context("Failed to create lock directory")?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        let mut boxed_lock = Box::new((RwLock::new(file), None));

        // SAFETY: the guard borrows the RwLock stored in the same heap allocation.
        // The Box is never moved out of, and the guard is taken out and dropped in
        // `Drop` before the RwLock itself.
        let lock_ptr = &mut boxed_lock.0 as *mut RwLock<File>;
        let guard = unsafe { (*lock_ptr).try_write() }.with_context(|| {
            format!("Syncer '{}' is already running (lock held)", syncer)
        })?;
        let static_guard: fd_lock::RwLockWriteGuard<'static, File> =
            unsafe { std::mem::transmute(guard) };
        boxed_lock.1 = Some(static_guard);

        info!("Acquired sync lock for syncer: {}", syncer);

        Ok(Self {
            _lock: boxed_lock,
            lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        self._lock.1.take();
        debug!("Released sync lock: {:?}", self.lock_path);

        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!("Failed to remove lock file: {}", e);
        }
    }
}

/// Keep lock file names to a safe character set
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
