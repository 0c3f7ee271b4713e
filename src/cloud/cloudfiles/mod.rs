//! Rackspace Cloud Files (OpenStack Swift) storage
//!
//! Large files are written as static large objects: numbered segments go into a
//! separate segments container, then a manifest object ties them together under
//! the requested key.

pub mod api;

use self::api::{SloSegment, SwiftApi};
use super::multipart::{self, MultipartSession};
use super::segments::{self, ChunkSpec, UploadLimits, UploadPlan, GIB};
use super::{
    key_batches, CloudError, DeleteTarget, HashKind, ItemFailure, ObjectMetadata, RemoteObject,
    Result, RetryPolicy, TransferBackend, UploadOptions,
};
use crate::utils::digest;
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const MAX_SEGMENTS: u64 = 1_000;

pub const LIMITS: UploadLimits = UploadLimits {
    provider: "CloudFiles",
    max_object_bytes: 5 * GIB,
    max_multipart_bytes: 5 * GIB * MAX_SEGMENTS,
    max_segments: MAX_SEGMENTS,
};

/// Paths per `?bulk-delete` request
pub const BULK_DELETE_BATCH_SIZE: usize = 10_000;

/// Names per listing request
pub const LIST_LIMIT: usize = 10_000;

pub struct CloudFilesBackend {
    api: Box<dyn SwiftApi>,
    name: String,
    container: String,
    segments_container: String,
    segment_bytes: u64,
    days_to_keep: Option<u32>,
    list_limit: usize,
    retry: RetryPolicy,
    containers_ready: AtomicBool,
}

impl CloudFilesBackend {
    pub fn new(api: Box<dyn SwiftApi>, container: &str) -> Self {
        Self {
            api,
            name: format!("CloudFiles ({})", container),
            container: container.to_string(),
            segments_container: format!("{}_segments", container),
            segment_bytes: 0,
            days_to_keep: None,
            list_limit: LIST_LIMIT,
            retry: RetryPolicy::default(),
            containers_ready: AtomicBool::new(false),
        }
    }

    pub fn with_segments_container(mut self, container: &str) -> Self {
        self.segments_container = container.to_string();
        self
    }

    /// Segment size in bytes; 0 disables segmented uploads
    pub fn with_segment_bytes(mut self, segment_bytes: u64) -> Self {
        self.segment_bytes = segment_bytes;
        self
    }

    pub fn with_days_to_keep(mut self, days_to_keep: Option<u32>) -> Self {
        self.days_to_keep = days_to_keep;
        self
    }

    pub fn with_list_limit(mut self, list_limit: usize) -> Self {
        self.list_limit = list_limit.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn ensure_containers(&self) -> Result<()> {
        if self.containers_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut containers = vec![self.container.as_str()];
        if self.segment_bytes > 0 {
            containers.push(self.segments_container.as_str());
        }
        for container in containers {
            self.retry
                .run(&format!("Create container '{}'", container), || {
                    self.api.ensure_container(container)
                })?;
        }

        self.containers_ready.store(true, Ordering::Release);
        Ok(())
    }

    fn delete_at(&self) -> Option<i64> {
        let options = UploadOptions {
            days_to_keep: self.days_to_keep,
            ..Default::default()
        };
        api::delete_at_header(options.delete_at(Utc::now()))
    }

    fn bulk_delete(&self, targets: &[DeleteTarget]) -> Result<()> {
        for batch in key_batches(targets, BULK_DELETE_BATCH_SIZE) {
            let paths: Vec<String> = batch
                .iter()
                .map(|key| format!("/{}/{}", self.container, key))
                .collect();
            let label = format!("Bulk delete {} object(s)", paths.len());

            self.retry.run(&label, || {
                let result = self.api.bulk_delete(&paths)?;
                if result.is_success() {
                    return Ok(());
                }
                let failures = if result.errors.is_empty() {
                    vec![ItemFailure {
                        key: format!("{} object(s)", paths.len()),
                        reason: result.response_status,
                    }]
                } else {
                    result.errors
                };
                Err(CloudError::BatchOperation {
                    operation: label.clone(),
                    failures,
                })
            })?;
        }
        Ok(())
    }
}

/// Static large object upload: segments first, then the manifest
struct SloUpload<'a> {
    backend: &'a CloudFilesBackend,
    key: &'a str,
    file_size: u64,
    segment_bytes: u64,
    delete_at: Option<i64>,
}

impl SloUpload<'_> {
    fn segment_key(&self, index: u32) -> String {
        format!("{}/{:04}", self.key, index)
    }

    fn segment_path(&self, index: u32) -> String {
        format!(
            "/{}/{}",
            self.backend.segments_container,
            self.segment_key(index)
        )
    }

    fn segment_size(&self, index: u32, total: usize) -> u64 {
        if index as usize == total {
            self.file_size - self.segment_bytes * (u64::from(index) - 1)
        } else {
            self.segment_bytes
        }
    }
}

impl MultipartSession for SloUpload<'_> {
    fn key(&self) -> &str {
        self.key
    }

    fn initiate(&self) -> Result<String> {
        // Segments are independent objects; the session is just the key prefix
        Ok(format!("{}/", self.key))
    }

    fn upload_part(&self, _session_id: &str, part: &ChunkSpec, data: &[u8]) -> Result<String> {
        self.backend.api.put_segment(
            &self.backend.segments_container,
            &self.segment_key(part.index),
            data,
            &part.md5_hex(),
            self.delete_at,
        )
    }

    fn complete(&self, _session_id: &str, parts: &[(u32, String)]) -> Result<()> {
        let manifest: Vec<SloSegment> = parts
            .iter()
            .map(|(index, etag)| SloSegment {
                path: self.segment_path(*index),
                etag: etag.clone(),
                size_bytes: self.segment_size(*index, parts.len()),
            })
            .collect();
        self.backend.api.put_manifest(
            &self.backend.container,
            self.key,
            &manifest,
            self.delete_at,
        )
    }

    fn abort(&self, _session_id: &str, parts: &[(u32, String)]) -> Result<()> {
        if parts.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = parts.iter().map(|(i, _)| self.segment_path(*i)).collect();
        debug!(key = self.key, segments = paths.len(), "Removing orphaned segments");
        self.backend.api.bulk_delete(&paths).map(|_| ())
    }
}

impl TransferBackend for CloudFilesBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn hash_kind(&self) -> HashKind {
        HashKind::Md5
    }

    fn upload(&self, source: &Path, remote_key: &str) -> Result<()> {
        let size = segments::file_size(source)?;
        let plan = LIMITS.plan(source, size, self.segment_bytes)?;
        self.ensure_containers()?;
        let delete_at = self.delete_at();

        match plan {
            UploadPlan::SingleShot => {
                info!("{}: Storing '{}'...", self.name, remote_key);
                let md5 = digest::file_content_hash(source, HashKind::Md5)
                    .map_err(|e| CloudError::io(source, e))?;
                self.retry.run(&format!("PUT '{}'", remote_key), || {
                    self.api.put_file(
                        &self.container,
                        remote_key,
                        source,
                        size,
                        &md5,
                        delete_at,
                    )
                })
            }
            UploadPlan::Segmented {
                segment_bytes,
                segments,
            } => {
                info!(
                    "{}: Storing '{}' as a static large object of {} segments...",
                    self.name, remote_key, segments
                );
                let session = SloUpload {
                    backend: self,
                    key: remote_key,
                    file_size: size,
                    segment_bytes,
                    delete_at,
                };
                multipart::upload_in_parts(&session, &self.retry, source, size, segment_bytes)
            }
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        // Listing a missing container is a 404; a fresh storage lists as empty
        self.ensure_containers()?;

        let mut objects = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.retry.run(&format!("List '{}'", prefix), || {
                self.api
                    .list_objects(&self.container, prefix, marker.as_deref(), self.list_limit)
            })?;

            let short_page = page.len() < self.list_limit;
            marker = page.last().map(|e| e.name.clone());
            objects.extend(
                page.into_iter()
                    .map(|entry| RemoteObject::new(entry.name, entry.hash).with_size(entry.bytes)),
            );

            if short_page || marker.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    fn delete(&self, targets: &[DeleteTarget]) -> Result<()> {
        let mut plain = Vec::new();
        for target in targets {
            match target {
                DeleteTarget::Object(object) if object.metadata(self)?.is_manifest => {
                    self.retry
                        .run(&format!("Delete manifest '{}'", object.key()), || {
                            self.api.delete_manifest(&self.container, object.key())
                        })?;
                }
                _ => plain.push(DeleteTarget::Key(target.key().to_string())),
            }
        }

        self.bulk_delete(&plain)
    }

    fn head_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        self.retry.run(&format!("HEAD '{}'", key), || {
            self.api.head_object(&self.container, key)
        })
    }
}
