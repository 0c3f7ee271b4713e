//! Amazon S3 (and S3-compatible) storage

pub mod api;
pub mod signer;
pub mod xml;

use self::api::S3Api;
use super::multipart::{self, MultipartSession};
use super::segments::{self, ChunkSpec, UploadLimits, UploadPlan, GIB, MIB, TIB};
use super::{
    key_batches, CloudError, DeleteTarget, ObjectMetadata, RemoteObject, Result, RetryPolicy,
    TransferBackend, UploadOptions,
};
use crate::utils::digest;
use std::path::Path;
use tracing::info;

pub const LIMITS: UploadLimits = UploadLimits {
    provider: "S3",
    max_object_bytes: 5 * GIB,
    max_multipart_bytes: 5 * TIB,
    max_segments: 10_000,
};

/// Smallest part S3 accepts, except for the last one
pub const MIN_CHUNK_MB: u64 = 5;
pub const DEFAULT_CHUNK_MB: u64 = 5;

/// Keys per Multi-Object Delete request
pub const DELETE_BATCH_SIZE: usize = 1_000;

pub struct S3Backend {
    api: Box<dyn S3Api>,
    name: String,
    chunk_bytes: u64,
    options: UploadOptions,
    retry: RetryPolicy,
}

impl S3Backend {
    pub fn new(api: Box<dyn S3Api>, bucket: &str) -> Self {
        Self {
            api,
            name: format!("S3 ({})", bucket),
            chunk_bytes: DEFAULT_CHUNK_MB * MIB,
            options: UploadOptions::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Multipart chunk size in bytes; 0 disables multipart uploads
    pub fn with_chunk_bytes(mut self, chunk_bytes: u64) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_bytes
    }
}

struct S3Multipart<'a> {
    api: &'a dyn S3Api,
    key: &'a str,
    options: &'a UploadOptions,
}

impl MultipartSession for S3Multipart<'_> {
    fn key(&self) -> &str {
        self.key
    }

    fn initiate(&self) -> Result<String> {
        self.api.initiate_multipart(self.key, self.options)
    }

    fn upload_part(&self, upload_id: &str, part: &ChunkSpec, data: &[u8]) -> Result<String> {
        self.api.upload_part(self.key, upload_id, part, data)
    }

    fn complete(&self, upload_id: &str, parts: &[(u32, String)]) -> Result<()> {
        self.api.complete_multipart(self.key, upload_id, parts)
    }

    fn abort(&self, upload_id: &str, _parts: &[(u32, String)]) -> Result<()> {
        self.api.abort_multipart(self.key, upload_id)
    }
}

impl TransferBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload(&self, source: &Path, remote_key: &str) -> Result<()> {
        let size = segments::file_size(source)?;

        match LIMITS.plan(source, size, self.chunk_bytes)? {
            UploadPlan::SingleShot => {
                info!("{}: Storing '{}'...", self.name, remote_key);
                let md5 = digest::file_md5_base64(source).map_err(|e| CloudError::io(source, e))?;
                self.retry.run(&format!("PUT '{}'", remote_key), || {
                    self.api
                        .put_object(remote_key, source, size, &md5, &self.options)
                })
            }
            UploadPlan::Segmented {
                segment_bytes,
                segments,
            } => {
                info!(
                    "{}: Storing '{}' in {} parts...",
                    self.name, remote_key, segments
                );
                let session = S3Multipart {
                    api: self.api.as_ref(),
                    key: remote_key,
                    options: &self.options,
                };
                multipart::upload_in_parts(&session, &self.retry, source, size, segment_bytes)
            }
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.retry.run(&format!("List '{}'", prefix), || {
                self.api.list_objects(prefix, marker.as_deref())
            })?;

            let truncated = page.is_truncated;
            marker = page.entries.last().map(|e| e.key.clone());
            objects.extend(page.entries.into_iter().map(|entry| {
                RemoteObject::new(entry.key, entry.etag)
                    .with_storage_class(entry.storage_class)
                    .with_size(entry.size)
            }));

            if !truncated || marker.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    fn delete(&self, targets: &[DeleteTarget]) -> Result<()> {
        for batch in key_batches(targets, DELETE_BATCH_SIZE) {
            let label = format!("Delete {} object(s)", batch.len());
            self.retry.run(&label, || {
                let failures = self.api.delete_objects(&batch)?;
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
        self.retry
            .run(&format!("HEAD '{}'", key), || self.api.head_object(key))
    }
}
