//! Local directory scanning

use super::exclude::ExcludeSet;
use super::{Result, SyncError};
use crate::utils::digest::{self, HashKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One regular file found under a sync root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Path relative to the sync root, `/`-separated
    pub relative_path: String,
    pub content_hash: String,
    pub size: u64,
}

/// Walks a directory and hashes every file it yields
#[derive(Debug, Clone, Default)]
pub struct LocalFileScanner {
    hash_kind: HashKind,
    excludes: ExcludeSet,
}

impl LocalFileScanner {
    pub fn new(hash_kind: HashKind) -> Self {
        Self {
            hash_kind,
            excludes: ExcludeSet::default(),
        }
    }

    pub fn with_excludes(mut self, excludes: ExcludeSet) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn hash_kind(&self) -> HashKind {
        self.hash_kind
    }

    /// Start a lazy scan of `root`
    ///
    /// Fails only if `root` is not a readable directory; problems with individual
    /// entries are logged and the entry is skipped.
    pub fn scan(&self, root: &Path) -> Result<Scan> {
        let metadata = std::fs::metadata(root).map_err(|e| SyncError::Scan {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(SyncError::Scan {
                path: root.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        Ok(Scan {
            root: root.to_path_buf(),
            walker,
            hash_kind: self.hash_kind,
            excludes: self.excludes.clone(),
        })
    }
}

/// Lazy iterator over the files of one scan
pub struct Scan {
    root: PathBuf,
    walker: walkdir::IntoIter,
    hash_kind: HashKind,
    excludes: ExcludeSet,
}

impl Scan {
    fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        Some(parts?.join("/"))
    }
}

impl Iterator for Scan {
    type Item = LocalFile;

    fn next(&mut self) -> Option<LocalFile> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(relative_path) = self.relative_path(path) else {
                warn!("Skipping file with a non UTF-8 name: {:?}", path);
                continue;
            };
            if self.excludes.matches(&relative_path) {
                debug!("Excluded: {}", relative_path);
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Skipping '{}': {}", relative_path, e);
                    continue;
                }
            };
            let content_hash = match digest::file_content_hash(path, self.hash_kind) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Skipping '{}': cannot hash file: {}", relative_path, e);
                    continue;
                }
            };

            return Some(LocalFile {
                path: path.to_path_buf(),
                relative_path,
                content_hash,
                size,
            });
        }
    }
}
