use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    pub storages: HashMap<String, StorageConfig>,
    #[serde(default)]
    pub syncers: HashMap<String, SyncerConfig>,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
    /// Write the log file as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Retry settings shared by every storage unless overridden
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_wait_seconds")]
    pub retry_wait_seconds: u64,

    /// HTTP request timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Exclude patterns applied by every syncer
    #[serde(default)]
    pub default_excludes: Vec<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_level: default_log_level(),
            log_max_files: default_log_max_files(),
            log_json: false,
            max_retries: default_max_retries(),
            retry_wait_seconds: default_retry_wait_seconds(),
            timeout_seconds: default_timeout(),
            default_excludes: Vec::new(),
        }
    }
}

/// One named storage: provider settings plus the options every provider shares
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(flatten)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub description: String,

    /// Remote path for uploads and listings
    #[serde(default)]
    pub path: String,

    /// Ask the provider to expire uploads after this many days (CloudFiles, GCS)
    #[serde(default)]
    pub days_to_keep: Option<u32>,

    /// Retry overrides
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_wait_seconds: Option<u64>,
}

impl StorageConfig {
    pub fn storage_type(&self) -> StorageType {
        match self.provider {
            ProviderConfig::S3(_) => StorageType::S3,
            ProviderConfig::CloudFiles(_) => StorageType::CloudFiles,
            ProviderConfig::Gcs(_) => StorageType::Gcs,
            ProviderConfig::Dropbox(_) => StorageType::Dropbox,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    S3,
    CloudFiles,
    Gcs,
    Dropbox,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::S3 => write!(f, "s3"),
            StorageType::CloudFiles => write!(f, "cloudfiles"),
            StorageType::Gcs => write!(f, "gcs"),
            StorageType::Dropbox => write!(f, "dropbox"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    S3(S3Config),
    CloudFiles(CloudFilesConfig),
    Gcs(GcsConfig),
    Dropbox(DropboxConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub bucket: String,

    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Multipart chunk size; 0 disables multipart uploads
    #[serde(default = "default_s3_chunk_size_mb")]
    pub chunk_size_mb: u64,

    #[serde(default)]
    pub storage_class: Option<String>,

    /// Server-side encryption, e.g. `AES256`
    #[serde(default)]
    pub encryption: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudFilesConfig {
    pub username: String,
    pub api_key: String,
    #[serde(default = "default_cloudfiles_auth_url")]
    pub auth_url: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Use the internal service network endpoint
    #[serde(default)]
    pub servicenet: bool,

    pub container: String,
    /// Defaults to `<container>_segments`
    #[serde(default)]
    pub segments_container: Option<String>,

    /// Static large object segment size; 0 disables segmenting
    #[serde(default)]
    pub segment_size_mb: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GcsConfig {
    pub bucket: String,
    /// OAuth2 bearer token
    pub access_token: String,
    #[serde(default)]
    pub endpoint: Option<String>,

    /// XML multipart chunk size; 0 disables multipart uploads
    #[serde(default = "default_gcs_chunk_size_mb")]
    pub chunk_size_mb: u64,

    #[serde(default)]
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DropboxConfig {
    pub access_token: String,

    /// Upload session chunk size; 0 disables upload sessions
    #[serde(default = "default_dropbox_chunk_size_mb")]
    pub chunk_size_mb: u64,
}

/// Syncer configuration: directories mirrored to one storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncerConfig {
    /// Storage name
    pub storage: String,

    #[serde(default)]
    pub description: String,

    /// Remote path; each directory lands under `<path>/<directory name>`
    #[serde(default = "default_syncer_path")]
    pub path: String,

    pub directories: Vec<PathBuf>,

    /// Delete remote files that no longer exist locally
    #[serde(default)]
    pub mirror: bool,

    /// Concurrent transfers; 0 transfers sequentially
    #[serde(default)]
    pub thread_count: usize,

    #[serde(default)]
    pub excludes: Vec<String>,
}

// Default value functions

fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_max_retries() -> u32 { 10 }
fn default_retry_wait_seconds() -> u64 { 30 }
fn default_timeout() -> u64 { 300 }
fn default_s3_region() -> String { "us-east-1".to_string() }
fn default_s3_chunk_size_mb() -> u64 { 5 }
fn default_gcs_chunk_size_mb() -> u64 { 5 }
fn default_dropbox_chunk_size_mb() -> u64 { 4 }
fn default_syncer_path() -> String { "backups".to_string() }
fn default_cloudfiles_auth_url() -> String {
    crate::cloud::cloudfiles::api::DEFAULT_AUTH_URL.to_string()
}
