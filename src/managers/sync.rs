//! Sync manager - runs configured syncers

use crate::cloud::join_key;
use crate::config::{expand_tilde, Config, SyncerConfig};
use crate::managers::storage::{real_backend_factory, BackendFactory, Segmentation};
use crate::sync::{ExcludeSet, SyncEngine, SyncSummary};
use crate::utils::locker::SyncLock;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

/// Outcome of one directory within a syncer run
#[derive(Debug, Clone)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub remote_base: String,
    pub summary: SyncSummary,
}

pub struct SyncManager {
    config: Config,
    factory: Box<BackendFactory>,
    lock_dir: PathBuf,
}

impl SyncManager {
    pub fn new(config: Config) -> Self {
        let factory = real_backend_factory(config.global.clone());
        Self {
            config,
            factory,
            lock_dir: std::env::temp_dir(),
        }
    }

    /// Create a sync manager with a custom backend factory
    pub fn with_backend_factory(config: Config, factory: Box<BackendFactory>) -> Self {
        Self {
            config,
            factory,
            lock_dir: std::env::temp_dir(),
        }
    }

    /// Directory holding the per-syncer run locks
    pub fn with_lock_dir(mut self, lock_dir: &Path) -> Self {
        self.lock_dir = lock_dir.to_path_buf();
        self
    }

    /// Run one syncer over all of its directories
    ///
    /// A directory that aborts stops the syncer; remaining directories are not
    /// touched.
    pub fn sync(&self, syncer_name: &str) -> Result<Vec<DirectoryReport>> {
        let syncer = self.config.syncer(syncer_name)?;
        let storage = self.config.storage(&syncer.storage)?;

        let _lock = SyncLock::acquire_in(&self.lock_dir, syncer_name)
            .with_context(|| format!("Failed to acquire lock for syncer '{}'", syncer_name))?;

        let backend = (self.factory)(&syncer.storage, storage, Segmentation::Disabled)
            .with_context(|| format!("Failed to set up storage '{}'", syncer.storage))?;
        let excludes = ExcludeSet::new(&self.config.effective_excludes(syncer))
            .context("Invalid exclude pattern")?;

        let engine = SyncEngine::new(backend.as_ref())
            .with_mirror(syncer.mirror)
            .with_workers(syncer.thread_count)
            .with_excludes(excludes);

        let start_time = Instant::now();
        info!(
            "Starting syncer '{}' ({} director{}) to {}",
            syncer_name,
            syncer.directories.len(),
            if syncer.directories.len() == 1 { "y" } else { "ies" },
            backend.name()
        );

        let mut reports = Vec::new();
        for directory in &syncer.directories {
            let directory = expand_tilde(directory);
            let remote_base = remote_base(syncer, &directory)?;

            let summary = engine
                .sync_directory(&directory, &remote_base)
                .with_context(|| {
                    format!("Syncer '{}' failed on {:?}", syncer_name, directory)
                })?;
            reports.push(DirectoryReport {
                directory,
                remote_base,
                summary,
            });
        }

        info!(
            "Syncer '{}' finished in {}s",
            syncer_name,
            start_time.elapsed().as_secs()
        );
        Ok(reports)
    }

    /// Run every configured syncer, in name order
    ///
    /// A failing syncer does not prevent the others from running.
    pub fn sync_all(&self) -> Result<Vec<DirectoryReport>> {
        let mut names: Vec<&String> = self.config.syncers.keys().collect();
        names.sort();

        let mut reports = Vec::new();
        let mut errors = Vec::new();
        for name in names {
            match self.sync(name) {
                Ok(mut syncer_reports) => reports.append(&mut syncer_reports),
                Err(e) => {
                    error!("Syncer '{}' failed: {:#}", name, e);
                    errors.push(name.clone());
                }
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("{} syncer(s) failed: {}", errors.len(), errors.join(", "));
        }
        Ok(reports)
    }
}

/// `<syncer path>/<directory name>`
pub fn remote_base(syncer: &SyncerConfig, directory: &Path) -> Result<String> {
    let name = directory
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Directory {:?} has no usable name", directory))?;
    Ok(join_key(&[&syncer.path, name]))
}
