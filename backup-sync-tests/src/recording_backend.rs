//! In-memory [`TransferBackend`] that records every call
//!
//! Used where a test cares about what the sync engine or a manager asks of a
//! backend rather than about any provider's wire protocol.

use backup_sync::cloud::{
    CloudError, DeleteTarget, HashKind, ItemFailure, ObjectMetadata, RemoteObject, Result,
    SizeLimit, TransferBackend,
};
use backup_sync::managers::storage::{BackendFactory, Segmentation};
use backup_sync::utils::digest;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Upload(String),
    List(String),
    Delete(Vec<String>),
    HeadMetadata(String),
}

#[derive(Default)]
struct State {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    calls: Mutex<Vec<RecordedCall>>,
    failing_keys: Mutex<HashSet<String>>,
    failing_deletes: AtomicBool,
    segmentation: Mutex<Vec<Segmentation>>,
    active_uploads: AtomicUsize,
    peak_uploads: AtomicUsize,
}

/// Cloneable handle; clones share the same objects and call log
#[derive(Clone)]
pub struct RecordingBackend {
    state: Arc<State>,
    hash_kind: HashKind,
    case_insensitive: bool,
    max_object_bytes: Option<u64>,
    upload_delay: Duration,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State::default()),
            hash_kind: HashKind::Md5,
            case_insensitive: false,
            max_object_bytes: None,
            upload_delay: Duration::ZERO,
        }
    }

    pub fn with_hash_kind(mut self, hash_kind: HashKind) -> Self {
        self.hash_kind = hash_kind;
        self
    }

    /// Treat keys that differ only in case as the same object
    pub fn with_case_insensitive_keys(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Reject uploads above `bytes` with `FileTooLarge`
    pub fn with_size_limit(mut self, bytes: u64) -> Self {
        self.max_object_bytes = Some(bytes);
        self
    }

    /// Sleep inside every upload, to make worker overlap observable
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Seed an object
    pub fn with_object(self, key: &str, data: &[u8]) -> Self {
        self.state.objects.lock().insert(key.to_string(), data.to_vec());
        self
    }

    /// Make every upload to `key` fail with a transport error
    pub fn fail_uploads_of(&self, key: &str) {
        self.state.failing_keys.lock().insert(key.to_string());
    }

    /// Make every delete call fail with a batch error naming its first key
    pub fn fail_deletes(&self) {
        self.state.failing_deletes.store(true, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.objects.lock().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.objects.lock().get(key).cloned()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().clone()
    }

    /// Keys uploaded, in call order
    pub fn uploads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Upload(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Key lists of every delete call
    pub fn deletes(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Delete(keys) => Some(keys),
                _ => None,
            })
            .collect()
    }

    /// Most uploads observed running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak_uploads.load(Ordering::SeqCst)
    }

    /// Segmentation modes requested through [`RecordingBackend::factory`]
    pub fn requested_segmentation(&self) -> Vec<Segmentation> {
        self.state.segmentation.lock().clone()
    }

    /// Backend factory handing out clones of this backend for every storage
    pub fn factory(&self) -> Box<BackendFactory> {
        let backend = self.clone();
        Box::new(move |_name, _storage, segmentation| {
            backend.state.segmentation.lock().push(segmentation);
            Ok(Box::new(backend.clone()) as Box<dyn TransferBackend>)
        })
    }

    fn hash(&self, data: &[u8]) -> String {
        match self.hash_kind {
            HashKind::Md5 => digest::md5_hex(data),
            HashKind::DropboxContentHash => digest::dropbox_content_hash(data),
        }
    }

    fn record(&self, call: RecordedCall) {
        self.state.calls.lock().push(call);
    }
}

impl TransferBackend for RecordingBackend {
    fn name(&self) -> &str {
        "Recording"
    }

    fn hash_kind(&self) -> HashKind {
        self.hash_kind
    }

    fn case_insensitive_keys(&self) -> bool {
        self.case_insensitive
    }

    fn upload(&self, source: &Path, remote_key: &str) -> Result<()> {
        self.record(RecordedCall::Upload(remote_key.to_string()));

        let active = self.state.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_uploads.fetch_max(active, Ordering::SeqCst);
        if !self.upload_delay.is_zero() {
            std::thread::sleep(self.upload_delay);
        }
        let result = self.store(source, remote_key);
        self.state.active_uploads.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        self.record(RecordedCall::List(prefix.to_string()));
        Ok(self
            .state
            .objects
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| {
                RemoteObject::new(key.clone(), self.hash(data)).with_size(data.len() as u64)
            })
            .collect())
    }

    fn delete(&self, targets: &[DeleteTarget]) -> Result<()> {
        let keys = DeleteTarget::keys(targets);
        self.record(RecordedCall::Delete(keys.clone()));
        if self.state.failing_deletes.load(Ordering::SeqCst) {
            return Err(CloudError::BatchOperation {
                operation: format!("Delete {} object(s)", keys.len()),
                failures: vec![ItemFailure {
                    key: keys.first().cloned().unwrap_or_default(),
                    reason: "AccessDenied".to_string(),
                }],
            });
        }
        let mut objects = self.state.objects.lock();
        for key in keys {
            objects.remove(&key);
        }
        Ok(())
    }

    fn head_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        self.record(RecordedCall::HeadMetadata(key.to_string()));
        let size = self
            .object(key)
            .map(|data| data.len())
            .ok_or_else(|| CloudError::transport(format!("HEAD '{}'", key), "HTTP 404"))?;

        let mut metadata = ObjectMetadata::default();
        metadata
            .raw
            .insert("content-length".to_string(), size.to_string());
        Ok(metadata)
    }
}

impl RecordingBackend {
    fn store(&self, source: &Path, remote_key: &str) -> Result<()> {
        if self.state.failing_keys.lock().contains(remote_key) {
            return Err(CloudError::transport(
                format!("PUT '{}'", remote_key),
                "HTTP 500 Internal Server Error",
            ));
        }

        let size = std::fs::metadata(source)
            .map_err(|e| CloudError::io(source, e))?
            .len();
        if let Some(limit) = self.max_object_bytes {
            if size > limit {
                return Err(CloudError::FileTooLarge {
                    path: source.to_path_buf(),
                    size,
                    limit,
                    limit_kind: SizeLimit::SingleObject,
                    provider: "Recording",
                });
            }
        }

        let data = std::fs::read(source).map_err(|e| CloudError::io(source, e))?;
        self.state
            .objects
            .lock()
            .insert(remote_key.to_string(), data);
        Ok(())
    }
}
