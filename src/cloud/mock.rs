//! In-memory object store backing the provider API mocks
//!
//! Each provider's `api::mock` module wraps a [`MockStore`] and layers the provider's
//! own protocol rules on top (digest checks, part ordering, page sizes). The store
//! records every call and can inject call-level and item-level failures.
//! Available for use in external test crates.

#![allow(dead_code)]

use super::{CloudError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// One object held by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: String,
    pub storage_class: Option<String>,
    /// Request headers/attributes recorded at upload time, keys lowercased
    pub headers: HashMap<String, String>,
}

impl StoredObject {
    pub fn new(data: Vec<u8>, etag: impl Into<String>) -> Self {
        Self {
            data,
            etag: etag.into(),
            storage_class: None,
            headers: HashMap::new(),
        }
    }
}

/// Recorded API call: operation name plus a short detail (key, batch size...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: String,
    pub detail: String,
}

#[derive(Clone, Default)]
pub struct MockStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    /// operation -> number of upcoming calls that fail
    failures: Arc<Mutex<HashMap<String, u32>>>,
    /// key -> (reason, number of upcoming batch deletes that report it failed)
    item_failures: Arc<Mutex<HashMap<String, (String, u32)>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call; returns an injected failure if one is pending for `operation`
    pub fn call(&self, operation: &str, detail: impl Into<String>) -> Result<()> {
        self.calls.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            detail: detail.into(),
        });

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::transport(
                    operation,
                    "HTTP 503 Service Unavailable: injected failure",
                ));
            }
        }
        Ok(())
    }

    /// Make the next `times` calls of `operation` fail
    pub fn fail_next(&self, operation: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), times);
    }

    /// Make every call of `operation` fail
    pub fn fail_always(&self, operation: &str) {
        self.fail_next(operation, u32::MAX);
    }

    /// Report `key` as failed in the next `times` batch deletes containing it
    pub fn fail_item(&self, key: &str, reason: &str, times: u32) {
        self.item_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), (reason.to_string(), times));
    }

    /// Pending item failure for `key`, consuming one occurrence
    pub fn take_item_failure(&self, key: &str) -> Option<String> {
        let mut item_failures = self.item_failures.lock().unwrap();
        match item_failures.get_mut(key) {
            Some((reason, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(reason.clone())
            }
            _ => None,
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls of one operation, in order
    pub fn calls_to(&self, operation: &str) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls_to(operation).len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn insert(&self, key: &str, object: StoredObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), object);
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.objects.lock().unwrap().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Up to `limit` objects under `prefix` strictly after `marker`, in key order
    pub fn page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Vec<(String, StoredObject)> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| marker.map_or(true, |m| key.as_str() > m))
            .take(limit)
            .map(|(key, object)| (key.clone(), object.clone()))
            .collect()
    }
}
