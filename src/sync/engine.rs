//! Sync engine - compares a local tree with a remote prefix and reconciles them

use super::exclude::ExcludeSet;
use super::pool::WorkerPool;
use super::scanner::{LocalFile, LocalFileScanner};
use super::{Result, SyncError};
use crate::cloud::{join_key, DeleteTarget, TransferBackend};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What happens to one relative path during a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDecision {
    /// Missing remotely or content differs
    Transfer,
    Unchanged,
    /// Remote only, left in place
    Orphaned,
    /// Remote only, removed because the run mirrors
    Deleted,
    /// Could not be stored (over the provider limit, or vanished locally)
    Skipped,
}

/// Running totals of one sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub transferred: usize,
    pub unchanged: usize,
    pub orphaned: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub mirror: bool,
}

impl SyncSummary {
    fn record(&mut self, decision: TransferDecision) {
        match decision {
            TransferDecision::Transfer => self.transferred += 1,
            TransferDecision::Unchanged => self.unchanged += 1,
            TransferDecision::Orphaned => self.orphaned += 1,
            TransferDecision::Deleted => self.deleted += 1,
            TransferDecision::Skipped => self.skipped += 1,
        }
    }

    /// Write the summary to the log; `partial` marks an aborted run
    pub fn log(&self, partial: bool) {
        if partial {
            warn!("Summary (partial, sync aborted):");
        } else {
            info!("Summary:");
        }
        info!("  Transferred Files: {}", self.transferred);
        if self.mirror {
            info!("  Deleted Files: {}", self.deleted);
        } else {
            info!("  Orphaned Files: {}", self.orphaned);
        }
        info!("  Unchanged Files: {}", self.unchanged);
        if self.skipped > 0 {
            warn!("  Skipped Files: {}", self.skipped);
        }
    }
}

/// Decide the fate of every path in the union of `local` and `remote`
///
/// Both maps go from relative path to content hash. The result is sorted by path.
pub fn classify(
    local: &BTreeMap<String, String>,
    remote: &BTreeMap<String, String>,
    mirror: bool,
) -> Vec<(String, TransferDecision)> {
    let paths: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();

    paths
        .into_iter()
        .map(|path| {
            let decision = match (local.get(path), remote.get(path)) {
                (Some(local_hash), Some(remote_hash)) if local_hash == remote_hash => {
                    TransferDecision::Unchanged
                }
                (Some(_), _) => TransferDecision::Transfer,
                (None, _) if mirror => TransferDecision::Deleted,
                (None, _) => TransferDecision::Orphaned,
            };
            (path.clone(), decision)
        })
        .collect()
}

/// Shared state of one sync run
///
/// Counting and the matching log line happen under one lock, so concurrent
/// workers never interleave a count with another worker's message.
#[derive(Debug, Default)]
pub struct TransferContext {
    summary: Mutex<SyncSummary>,
}

impl TransferContext {
    pub fn new(mirror: bool) -> Self {
        Self {
            summary: Mutex::new(SyncSummary {
                mirror,
                ..Default::default()
            }),
        }
    }

    /// Count one event for `path`; `reason` is only used for skips
    pub fn record(&self, decision: TransferDecision, path: &str, reason: Option<&str>) {
        let mut summary = self.summary.lock().unwrap_or_else(|p| p.into_inner());
        match decision {
            TransferDecision::Transfer => info!("  [transferring] '{}'", path),
            TransferDecision::Deleted => info!("  [removing] '{}'", path),
            TransferDecision::Orphaned => info!("  [orphaned] '{}'", path),
            TransferDecision::Skipped => {
                warn!("  [skipping] '{}': {}", path, reason.unwrap_or("skipped"))
            }
            TransferDecision::Unchanged => debug!("  [unchanged] '{}'", path),
        }
        summary.record(decision);
    }

    pub fn snapshot(&self) -> SyncSummary {
        self.summary
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn into_summary(self) -> SyncSummary {
        self.summary.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

/// Reconciles local directories with a remote namespace through one backend
pub struct SyncEngine<'a> {
    backend: &'a dyn TransferBackend,
    mirror: bool,
    pool: WorkerPool,
    excludes: ExcludeSet,
}

impl<'a> SyncEngine<'a> {
    pub fn new(backend: &'a dyn TransferBackend) -> Self {
        Self {
            backend,
            mirror: false,
            pool: WorkerPool::new(0),
            excludes: ExcludeSet::default(),
        }
    }

    /// Delete remote files that no longer exist locally
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Number of concurrent transfers; 0 transfers sequentially
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool = WorkerPool::new(workers);
        self
    }

    pub fn with_excludes(mut self, excludes: ExcludeSet) -> Self {
        self.excludes = excludes;
        self
    }

    /// Make `remote_base` reflect `local_dir`
    pub fn sync_directory(&self, local_dir: &Path, remote_base: &str) -> Result<SyncSummary> {
        let remote_base = remote_base.trim_matches('/');
        info!(
            "{}: Syncing {:?} to '{}'{}",
            self.backend.name(),
            local_dir,
            remote_base,
            if self.mirror { " (mirroring)" } else { "" }
        );

        let remote = self.remote_hashes(remote_base)?;
        let local = self.local_files(local_dir)?;
        let local_hashes: BTreeMap<String, String> = local
            .iter()
            .map(|(path, file)| (path.clone(), file.content_hash.clone()))
            .collect();
        debug!(
            local = local.len(),
            remote = remote.len(),
            "Gathered file lists"
        );

        // On case-insensitive stores a remote-only path may be a local file renamed by case
        let local_folded: BTreeSet<String> = if self.backend.case_insensitive_keys() {
            local.keys().map(|path| path.to_lowercase()).collect()
        } else {
            BTreeSet::new()
        };

        let context = TransferContext::new(self.mirror);
        let mut transfers: Vec<&LocalFile> = Vec::new();
        let mut deletions: Vec<String> = Vec::new();

        for (path, decision) in classify(&local_hashes, &remote, self.mirror) {
            match decision {
                TransferDecision::Transfer => {
                    if let Some(file) = local.get(&path) {
                        transfers.push(file);
                    }
                }
                TransferDecision::Deleted | TransferDecision::Orphaned
                    if local_folded.contains(&path.to_lowercase()) =>
                {
                    debug!("  [same object as local] '{}'", path);
                }
                TransferDecision::Deleted => deletions.push(path),
                other => context.record(other, &path, None),
            }
        }

        let outcome = self
            .transfer_all(&transfers, remote_base, &context)
            .and_then(|_| self.delete_all(&deletions, remote_base, &context));

        match outcome {
            Ok(()) => {
                let summary = context.into_summary();
                summary.log(false);
                Ok(summary)
            }
            Err(e) => {
                context.snapshot().log(true);
                Err(e)
            }
        }
    }

    /// Remote objects under `remote_base/`, keyed by path relative to it
    fn remote_hashes(&self, remote_base: &str) -> Result<BTreeMap<String, String>> {
        let prefix = if remote_base.is_empty() {
            String::new()
        } else {
            format!("{}/", remote_base)
        };

        Ok(self
            .backend
            .list(&prefix)?
            .into_iter()
            .filter_map(|object| {
                let relative = object.key().strip_prefix(&prefix)?;
                if relative.is_empty() {
                    return None;
                }
                Some((relative.to_string(), object.content_hash().to_string()))
            })
            .collect())
    }

    fn local_files(&self, local_dir: &Path) -> Result<BTreeMap<String, LocalFile>> {
        let scanner =
            LocalFileScanner::new(self.backend.hash_kind()).with_excludes(self.excludes.clone());
        Ok(scanner
            .scan(local_dir)?
            .map(|file| (file.relative_path.clone(), file))
            .collect())
    }

    fn transfer_all(
        &self,
        transfers: &[&LocalFile],
        remote_base: &str,
        context: &TransferContext,
    ) -> Result<()> {
        self.pool.run(transfers, |file| {
            let key = join_key(&[remote_base, &file.relative_path]);
            match self.backend.upload(&file.path, &key) {
                Ok(()) => {
                    context.record(TransferDecision::Transfer, &file.relative_path, None);
                    Ok(())
                }
                Err(e) if e.is_file_too_large() || e.is_missing_source() => {
                    context.record(
                        TransferDecision::Skipped,
                        &file.relative_path,
                        Some(&e.to_string()),
                    );
                    Ok(())
                }
                Err(e) => {
                    error!("Transfer of '{}' failed: {}", file.relative_path, e);
                    Err(SyncError::Aborted {
                        path: file.relative_path.clone(),
                        source: e,
                    })
                }
            }
        })
    }

    fn delete_all(
        &self,
        deletions: &[String],
        remote_base: &str,
        context: &TransferContext,
    ) -> Result<()> {
        if deletions.is_empty() {
            return Ok(());
        }

        let targets: Vec<DeleteTarget> = deletions
            .iter()
            .map(|path| DeleteTarget::Key(join_key(&[remote_base, path])))
            .collect();
        if let Err(e) = self.backend.delete(&targets) {
            error!("Removing {} remote file(s) failed: {}", targets.len(), e);
            return Err(SyncError::DeleteAborted {
                count: targets.len(),
                source: e,
            });
        }

        for path in deletions {
            context.record(TransferDecision::Deleted, path, None);
        }
        Ok(())
    }
}
