//! Storage manager - builds provider backends from configuration and runs
//! one-off uploads, listings and deletes against them

use crate::cloud::cloudfiles::api::{RealSwiftApi, SwiftConnection};
use crate::cloud::cloudfiles::CloudFilesBackend;
use crate::cloud::dropbox::api::{DropboxConnection, RealDropboxApi};
use crate::cloud::dropbox::DropboxBackend;
use crate::cloud::gcs::api::{GcsConnection, RealGcsApi, DEFAULT_ENDPOINT};
use crate::cloud::gcs::GcsBackend;
use crate::cloud::s3::api::{RealS3Api, S3Connection};
use crate::cloud::s3::S3Backend;
use crate::cloud::segments::MIB;
use crate::cloud::{join_key, DeleteTarget, RemoteObject, TransferBackend, UploadOptions};
use crate::config::{effective_retry_policy, Config, GlobalConfig, ProviderConfig, StorageConfig};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Whether a backend may split large files into segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segmentation {
    Enabled,
    /// Whole-object uploads only, so listings carry comparable content hashes
    Disabled,
}

/// Builds the backend for a named storage
pub type BackendFactory =
    dyn Fn(&str, &StorageConfig, Segmentation) -> Result<Box<dyn TransferBackend>> + Send + Sync;

/// Build the real HTTP backend for `storage`
pub fn create_backend(
    storage: &StorageConfig,
    global: &GlobalConfig,
    segmentation: Segmentation,
) -> Result<Box<dyn TransferBackend>> {
    let retry = effective_retry_policy(storage, global);
    let timeout = Duration::from_secs(global.timeout_seconds);
    // Dropbox content hashes do not depend on how the upload was chunked
    let segmented = |chunk_mb: u64| match segmentation {
        Segmentation::Enabled => chunk_mb * MIB,
        Segmentation::Disabled => 0,
    };

    let backend: Box<dyn TransferBackend> = match &storage.provider {
        ProviderConfig::S3(s3) => {
            let api = RealS3Api::new(&S3Connection {
                bucket: s3.bucket.clone(),
                region: s3.region.clone(),
                access_key_id: s3.access_key_id.clone(),
                secret_access_key: s3.secret_access_key.clone(),
                endpoint: s3.endpoint.clone(),
                timeout,
            })
            .context("Failed to create S3 client")?;
            Box::new(
                S3Backend::new(Box::new(api), &s3.bucket)
                    .with_chunk_bytes(segmented(s3.chunk_size_mb))
                    .with_options(UploadOptions {
                        storage_class: s3.storage_class.clone(),
                        encryption: s3.encryption.clone(),
                        days_to_keep: None,
                    })
                    .with_retry(retry),
            )
        }
        ProviderConfig::CloudFiles(cf) => {
            let api = RealSwiftApi::new(SwiftConnection {
                username: cf.username.clone(),
                api_key: cf.api_key.clone(),
                auth_url: cf.auth_url.clone(),
                region: cf.region.clone(),
                servicenet: cf.servicenet,
                timeout,
            })
            .context("Failed to create CloudFiles client")?;
            let mut backend = CloudFilesBackend::new(Box::new(api), &cf.container)
                .with_segment_bytes(segmented(cf.segment_size_mb))
                .with_days_to_keep(storage.days_to_keep)
                .with_retry(retry);
            if let Some(segments_container) = &cf.segments_container {
                backend = backend.with_segments_container(segments_container);
            }
            Box::new(backend)
        }
        ProviderConfig::Gcs(gcs) => {
            let api = RealGcsApi::new(GcsConnection {
                bucket: gcs.bucket.clone(),
                access_token: gcs.access_token.clone(),
                endpoint: gcs
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                timeout,
            })
            .context("Failed to create GCS client")?;
            Box::new(
                GcsBackend::new(Box::new(api), &gcs.bucket)
                    .with_chunk_bytes(segmented(gcs.chunk_size_mb))
                    .with_options(UploadOptions {
                        storage_class: gcs.storage_class.clone(),
                        encryption: None,
                        days_to_keep: storage.days_to_keep,
                    })
                    .with_retry(retry),
            )
        }
        ProviderConfig::Dropbox(dropbox) => {
            let api = RealDropboxApi::new(&DropboxConnection::new(&dropbox.access_token, timeout))
                .context("Failed to create Dropbox client")?;
            Box::new(
                DropboxBackend::new(Box::new(api))
                    .with_chunk_bytes(dropbox.chunk_size_mb * MIB)
                    .with_retry(retry),
            )
        }
    };

    Ok(backend)
}

/// Default factory: real backends configured from `global`
pub fn real_backend_factory(global: GlobalConfig) -> Box<BackendFactory> {
    Box::new(move |_name, storage, segmentation| create_backend(storage, &global, segmentation))
}

/// Key prefix under a storage's configured path
pub fn storage_prefix(storage_path: &str, prefix: &str) -> String {
    let base = storage_path.trim_matches('/');
    let prefix = prefix.trim_start_matches('/');
    if base.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", base, prefix)
    }
}

pub struct StorageManager {
    config: Config,
    factory: Box<BackendFactory>,
}

impl StorageManager {
    pub fn new(config: Config) -> Self {
        let factory = real_backend_factory(config.global.clone());
        Self { config, factory }
    }

    /// Create a storage manager with a custom backend factory
    pub fn with_backend_factory(config: Config, factory: Box<BackendFactory>) -> Self {
        Self { config, factory }
    }

    fn backend(&self, storage_name: &str) -> Result<(&StorageConfig, Box<dyn TransferBackend>)> {
        let storage = self.config.storage(storage_name)?;
        let backend = (self.factory)(storage_name, storage, Segmentation::Enabled)
            .with_context(|| format!("Failed to set up storage '{}'", storage_name))?;
        Ok((storage, backend))
    }

    /// Upload one file, returning the remote key it was stored under
    ///
    /// Without an explicit key the file name is placed under the storage path.
    /// An explicit key is used as-is.
    pub fn upload(&self, storage_name: &str, file: &Path, key: Option<&str>) -> Result<String> {
        let (storage, backend) = self.backend(storage_name)?;

        let key = match key {
            Some(key) => key.trim_start_matches('/').to_string(),
            None => {
                let file_name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("Cannot derive a key from {:?}", file))?;
                join_key(&[&storage.path, file_name])
            }
        };

        info!("Uploading {:?} to {} as '{}'", file, backend.name(), key);
        backend
            .upload(file, &key)
            .with_context(|| format!("Failed to upload {:?}", file))?;
        info!("Upload of '{}' complete", key);
        Ok(key)
    }

    /// Objects under `prefix`, relative to the storage path
    pub fn list(&self, storage_name: &str, prefix: &str) -> Result<Vec<RemoteObject>> {
        let (storage, backend) = self.backend(storage_name)?;
        let prefix = storage_prefix(&storage.path, prefix);
        backend
            .list(&prefix)
            .with_context(|| format!("Failed to list '{}' on {}", prefix, backend.name()))
    }

    /// Delete full remote keys (as printed by `list`)
    pub fn delete(&self, storage_name: &str, keys: &[String]) -> Result<usize> {
        let (_, backend) = self.backend(storage_name)?;
        let targets: Vec<DeleteTarget> = keys.iter().cloned().map(DeleteTarget::Key).collect();

        info!("Deleting {} object(s) from {}", targets.len(), backend.name());
        backend
            .delete(&targets)
            .with_context(|| format!("Failed to delete from {}", backend.name()))?;
        Ok(targets.len())
    }
}
