//! Remote object descriptors

use super::{Result, TransferBackend};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Normalized result of a metadata fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Server-side encryption applied to the object, if any
    pub encryption: Option<String>,
    pub storage_class: Option<String>,
    /// Provider-scheduled deletion time (Swift `X-Delete-At`, GCS custom time)
    pub delete_at: Option<DateTime<Utc>>,
    /// Swift static large object manifest
    pub is_manifest: bool,
    /// Raw headers or fields, keys lowercased
    pub raw: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Look up a raw header/field case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.raw.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.delete_at.is_some()
    }
}

/// Immutable descriptor of one remote entry, built from a listing
#[derive(Debug, Clone)]
pub struct RemoteObject {
    key: String,
    content_hash: String,
    storage_class: Option<String>,
    size: u64,
    metadata: OnceLock<ObjectMetadata>,
}

impl RemoteObject {
    pub fn new(key: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_hash: content_hash.into(),
            storage_class: None,
            size: 0,
            metadata: OnceLock::new(),
        }
    }

    pub fn with_storage_class(mut self, storage_class: Option<String>) -> Self {
        self.storage_class = storage_class;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn storage_class(&self) -> Option<&str> {
        self.storage_class.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Extended metadata, fetched from `backend` on first access and cached
    pub fn metadata(&self, backend: &dyn TransferBackend) -> Result<&ObjectMetadata> {
        if let Some(metadata) = self.metadata.get() {
            return Ok(metadata);
        }
        let fetched = backend.head_metadata(&self.key)?;
        Ok(self.metadata.get_or_init(|| fetched))
    }

    /// Whether metadata has already been fetched for this descriptor
    pub fn has_cached_metadata(&self) -> bool {
        self.metadata.get().is_some()
    }
}

/// Something to delete: a bare key or a descriptor from a listing
#[derive(Debug, Clone)]
pub enum DeleteTarget {
    Key(String),
    Object(RemoteObject),
}

impl DeleteTarget {
    pub fn key(&self) -> &str {
        match self {
            DeleteTarget::Key(key) => key,
            DeleteTarget::Object(object) => object.key(),
        }
    }

    /// Flatten targets into the key list every provider call works with
    pub fn keys(targets: &[DeleteTarget]) -> Vec<String> {
        targets.iter().map(|t| t.key().to_string()).collect()
    }
}

impl From<RemoteObject> for DeleteTarget {
    fn from(object: RemoteObject) -> Self {
        DeleteTarget::Object(object)
    }
}

impl From<&str> for DeleteTarget {
    fn from(key: &str) -> Self {
        DeleteTarget::Key(key.to_string())
    }
}

impl From<String> for DeleteTarget {
    fn from(key: String) -> Self {
        DeleteTarget::Key(key)
    }
}
