//! Dropbox storage
//!
//! Keys map to absolute Dropbox paths (`backups/a.txt` -> `/backups/a.txt`).
//! Large files go through upload sessions; deletes run as async batch jobs that
//! are polled until they finish.

pub mod api;

use self::api::{DeleteBatchStatus, DropboxApi};
use super::multipart::{self, MultipartSession};
use super::segments::{self, ChunkSpec, UploadLimits, UploadPlan, GIB, MIB};
use super::{
    key_batches, CloudError, DeleteTarget, HashKind, ItemFailure, ObjectMetadata, RemoteObject,
    Result, RetryPolicy, TransferBackend,
};
use crate::utils::digest;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const LIMITS: UploadLimits = UploadLimits {
    provider: "Dropbox",
    max_object_bytes: 150 * MIB,
    max_multipart_bytes: 350 * GIB,
    max_segments: 10_000,
};

pub const DEFAULT_CHUNK_MB: u64 = 4;
/// Largest chunk a single session append accepts
pub const MAX_CHUNK_MB: u64 = 150;

/// Entries per `delete_batch` job
pub const DELETE_BATCH_SIZE: usize = 1_000;

const MAX_JOB_POLLS: u32 = 600;

pub struct DropboxBackend {
    api: Box<dyn DropboxApi>,
    name: String,
    chunk_bytes: u64,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl DropboxBackend {
    pub fn new(api: Box<dyn DropboxApi>) -> Self {
        Self {
            api,
            name: "Dropbox".to_string(),
            chunk_bytes: DEFAULT_CHUNK_MB * MIB,
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    /// Session chunk size in bytes; 0 disables upload sessions
    pub fn with_chunk_bytes(mut self, chunk_bytes: u64) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }

    /// Delay between `delete_batch/check` polls
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one delete job to completion, returning its per-path failures
    fn run_delete_job(&self, paths: &[String]) -> Result<Vec<ItemFailure>> {
        let mut status = self.api.delete_batch(paths)?;
        let mut polls = 0u32;

        loop {
            match status {
                DeleteBatchStatus::InProgress(job_id) => {
                    polls += 1;
                    if polls > MAX_JOB_POLLS {
                        return Err(CloudError::transport(
                            "Delete batch",
                            format!("job {} did not finish after {} checks", job_id, MAX_JOB_POLLS),
                        ));
                    }
                    if !self.poll_interval.is_zero() {
                        std::thread::sleep(self.poll_interval);
                    }
                    status = self.api.delete_batch_check(&job_id)?;
                }
                DeleteBatchStatus::Complete(outcomes) => {
                    debug!(paths = paths.len(), polls, "Delete batch complete");
                    return Ok(paths
                        .iter()
                        .zip(outcomes)
                        .filter_map(|(path, outcome)| {
                            outcome
                                .filter(|reason| !reason.ends_with("not_found"))
                                .map(|reason| ItemFailure {
                                    key: to_key(path),
                                    reason,
                                })
                        })
                        .collect());
                }
                DeleteBatchStatus::Failed(message) => {
                    return Err(CloudError::transport("Delete batch", message));
                }
            }
        }
    }
}

/// `backups/a.txt` -> `/backups/a.txt`
pub fn to_path(key: &str) -> String {
    format!("/{}", key.trim_start_matches('/'))
}

pub fn to_key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// Folder to list recursively for a key prefix; the root folder is `""`
fn folder_for_prefix(prefix: &str) -> String {
    let folder = match prefix.rsplit_once('/') {
        Some((parent, _)) => parent,
        None => "",
    };
    if folder.trim_matches('/').is_empty() {
        String::new()
    } else {
        to_path(folder)
    }
}

struct UploadSession<'a> {
    api: &'a dyn DropboxApi,
    key: &'a str,
    path: String,
    file_size: u64,
}

impl MultipartSession for UploadSession<'_> {
    fn key(&self) -> &str {
        self.key
    }

    fn initiate(&self) -> Result<String> {
        self.api.session_start()
    }

    fn upload_part(&self, session_id: &str, part: &ChunkSpec, data: &[u8]) -> Result<String> {
        let hash = digest::dropbox_content_hash(data);
        self.api
            .session_append(session_id, part.byte_offset, data, &hash)?;
        Ok(hash)
    }

    fn complete(&self, session_id: &str, _parts: &[(u32, String)]) -> Result<()> {
        self.api
            .session_finish(session_id, self.file_size, &self.path)
    }

    fn abort(&self, session_id: &str, _parts: &[(u32, String)]) -> Result<()> {
        // Unfinished sessions expire on their own
        debug!(key = self.key, session_id, "Abandoning upload session");
        Ok(())
    }
}

impl TransferBackend for DropboxBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash_kind(&self) -> HashKind {
        HashKind::DropboxContentHash
    }

    fn case_insensitive_keys(&self) -> bool {
        true
    }

    fn upload(&self, source: &Path, remote_key: &str) -> Result<()> {
        let size = segments::file_size(source)?;
        let path = to_path(remote_key);

        match LIMITS.plan(source, size, self.chunk_bytes)? {
            UploadPlan::SingleShot => {
                info!("{}: Storing '{}'...", self.name, path);
                let hash = digest::file_content_hash(source, HashKind::DropboxContentHash)
                    .map_err(|e| CloudError::io(source, e))?;
                self.retry.run(&format!("Upload '{}'", path), || {
                    self.api.upload(&path, source, size, &hash)
                })
            }
            UploadPlan::Segmented {
                segment_bytes,
                segments,
            } => {
                info!(
                    "{}: Storing '{}' in {} chunks...",
                    self.name, path, segments
                );
                let session = UploadSession {
                    api: self.api.as_ref(),
                    key: remote_key,
                    path: path.clone(),
                    file_size: size,
                };
                multipart::upload_in_parts(&session, &self.retry, source, size, segment_bytes)
            }
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let folder = folder_for_prefix(prefix);
        let mut entries = Vec::new();

        let mut page = self.retry.run(&format!("List folder '{}'", folder), || {
            self.api.list_folder(&folder)
        })?;
        loop {
            let has_more = page.has_more;
            let cursor = std::mem::take(&mut page.cursor);
            entries.append(&mut page.entries);
            if !has_more {
                break;
            }
            page = self.retry.run("Continue folder listing", || {
                self.api.list_folder_continue(&cursor)
            })?;
        }

        let mut objects: Vec<RemoteObject> = entries
            .into_iter()
            .map(|entry| {
                RemoteObject::new(to_key(&entry.path), entry.content_hash).with_size(entry.size)
            })
            .filter(|object| object.key().starts_with(prefix))
            .collect();
        // Listing order is unspecified
        objects.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(objects)
    }

    fn delete(&self, targets: &[DeleteTarget]) -> Result<()> {
        for batch in key_batches(targets, DELETE_BATCH_SIZE) {
            let paths: Vec<String> = batch.iter().map(|key| to_path(key)).collect();
            let label = format!("Delete batch of {} path(s)", paths.len());
            self.retry.run(&label, || {
                let failures = self.run_delete_job(&paths)?;
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(CloudError::BatchOperation {
                        operation: label.clone(),
                        failures,
                    })
                }
            })?;
        }
        Ok(())
    }

    fn head_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let path = to_path(key);
        self.retry
            .run(&format!("Get metadata '{}'", path), || {
                self.api.get_metadata(&path)
            })
    }
}
