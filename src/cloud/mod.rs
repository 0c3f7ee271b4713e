//! Cloud transfer core
//!
//! One [`TransferBackend`] implementation per provider. Each backend owns a
//! [`RetryPolicy`] and a provider API handle (a small trait with a real HTTP
//! implementation and an in-memory mock), and is responsible for:
//!
//! - enforcing the provider's size limits before any network I/O
//! - single-shot vs. segmented uploads, with per-request content hashes
//! - listing pagination and batched deletes
//! - lazy metadata lookups for [`RemoteObject::metadata`]

pub mod cloudfiles;
pub mod dropbox;
mod error;
pub mod gcs;
pub mod http;
pub mod mock;
pub mod multipart;
mod object;
pub mod s3;
pub mod segments;

pub use crate::utils::digest::HashKind;
pub use crate::utils::retry::RetryPolicy;
pub use error::{CloudError, ItemFailure, Result, SizeLimit};
pub use object::{DeleteTarget, ObjectMetadata, RemoteObject};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::Path;

/// Common contract across all storage providers
pub trait TransferBackend: Send + Sync {
    /// Human-readable target, used in log lines
    fn name(&self) -> &str;

    /// Hash algorithm behind [`RemoteObject::content_hash`] for this provider
    fn hash_kind(&self) -> HashKind {
        HashKind::Md5
    }

    /// Whether keys that differ only in case name the same object
    fn case_insensitive_keys(&self) -> bool {
        false
    }

    /// Upload a finalized local file to `remote_key`
    fn upload(&self, source: &Path, remote_key: &str) -> Result<()>;

    /// All objects whose key starts with `prefix`, in lexicographic key order
    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>>;

    /// Delete objects; keys that do not exist are not an error
    fn delete(&self, targets: &[DeleteTarget]) -> Result<()>;

    /// Fetch extended metadata for one object
    fn head_metadata(&self, key: &str) -> Result<ObjectMetadata>;
}

/// Optional provider-specific upload attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub storage_class: Option<String>,
    pub encryption: Option<String>,
    /// Ask the provider to remove the object after this many days
    pub days_to_keep: Option<u32>,
}

impl UploadOptions {
    /// Deletion instant derived from `days_to_keep`, relative to `now`
    pub fn delete_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.days_to_keep
            .map(|days| now + ChronoDuration::days(i64::from(days)))
    }
}

/// Join path components into a remote key, without doubled or leading slashes
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split `targets` into provider-sized batches of keys
pub fn key_batches(targets: &[DeleteTarget], batch_size: usize) -> Vec<Vec<String>> {
    DeleteTarget::keys(targets)
        .chunks(batch_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}
