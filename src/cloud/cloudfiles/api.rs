//! Swift / Rackspace Cloud Files operations abstraction for testability

#![allow(dead_code)]

use crate::cloud::http::{self, encode_path, encode_query};
use crate::cloud::{CloudError, ItemFailure, ObjectMetadata, Result};
use crate::utils::digest;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "CloudFiles";

pub const DEFAULT_AUTH_URL: &str = "https://identity.api.rackspacecloud.com";

/// One object from a container listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SwiftEntry {
    pub name: String,
    /// MD5 hex of the object (of the manifest for SLOs)
    pub hash: String,
    pub bytes: u64,
}

/// One segment entry of a static large object manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SloSegment {
    /// `/container/object` path of the segment
    pub path: String,
    pub etag: String,
    pub size_bytes: u64,
}

/// Parsed `?bulk-delete` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDeleteResult {
    pub response_status: String,
    pub errors: Vec<ItemFailure>,
}

impl BulkDeleteResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.response_status.starts_with("200")
    }
}

/// Abstraction for Swift requests, enabling mocking in tests
pub trait SwiftApi: Send + Sync {
    /// Create a container if it does not exist yet
    fn ensure_container(&self, container: &str) -> Result<()>;

    /// Stream a whole file as one object, with its MD5 hex as `ETag`
    fn put_file(
        &self,
        container: &str,
        key: &str,
        source: &Path,
        size: u64,
        md5_hex: &str,
        delete_at: Option<i64>,
    ) -> Result<()>;

    /// Store one in-memory segment, returning the ETag the server reports
    fn put_segment(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        md5_hex: &str,
        delete_at: Option<i64>,
    ) -> Result<String>;

    /// Write a static large object manifest
    fn put_manifest(
        &self,
        container: &str,
        key: &str,
        segments: &[SloSegment],
        delete_at: Option<i64>,
    ) -> Result<()>;

    /// One listing page: up to `limit` names under `prefix` after `marker`
    fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SwiftEntry>>;

    /// Bulk delete of `/container/object` paths
    fn bulk_delete(&self, paths: &[String]) -> Result<BulkDeleteResult>;

    /// Delete an SLO manifest together with its segments
    fn delete_manifest(&self, container: &str, key: &str) -> Result<()>;

    fn head_object(&self, container: &str, key: &str) -> Result<ObjectMetadata>;
}

/// Identity and endpoint settings for [`RealSwiftApi`]
#[derive(Debug, Clone)]
pub struct SwiftConnection {
    pub username: String,
    pub api_key: String,
    pub auth_url: String,
    /// Preferred region; the first object-store endpoint is used otherwise
    pub region: Option<String>,
    /// Use the internal (ServiceNet) endpoint
    pub servicenet: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
struct AuthSession {
    token: String,
    storage_url: String,
}

/// Real Cloud Files client
pub struct RealSwiftApi {
    client: Client,
    connection: SwiftConnection,
    session: Mutex<Option<AuthSession>>,
}

#[derive(Deserialize)]
struct AuthResponse {
    access: Access,
}

#[derive(Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct Token {
    id: String,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct Endpoint {
    region: Option<String>,
    #[serde(rename = "publicURL")]
    public_url: Option<String>,
    #[serde(rename = "internalURL")]
    internal_url: Option<String>,
}

#[derive(Deserialize)]
struct BulkDeleteResponse {
    #[serde(rename = "Response Status", default)]
    response_status: String,
    #[serde(rename = "Errors", default)]
    errors: Vec<(String, String)>,
}

impl RealSwiftApi {
    pub fn new(connection: SwiftConnection) -> Result<Self> {
        Ok(Self {
            client: http::build_client(connection.timeout)?,
            connection,
            session: Mutex::new(None),
        })
    }

    fn authenticate(&self) -> Result<AuthSession> {
        let operation = "Authenticate with Cloud Files";
        let body = serde_json::json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": self.connection.username,
                    "apiKey": self.connection.api_key,
                }
            }
        });
        let url = format!("{}/v2.0/tokens", self.connection.auth_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .map_err(|e| http::request_error(operation, e))?;
        let auth: AuthResponse = http::check_status(operation, response)?
            .json()
            .map_err(|e| http::request_error(operation, e))?;

        let storage_url = self.select_endpoint(&auth.access.service_catalog)?;
        debug!(storage_url = %storage_url, "Authenticated with Cloud Files");
        Ok(AuthSession {
            token: auth.access.token.id,
            storage_url,
        })
    }

    fn select_endpoint(&self, catalog: &[CatalogEntry]) -> Result<String> {
        let endpoints: Vec<&Endpoint> = catalog
            .iter()
            .filter(|entry| entry.kind == "object-store")
            .flat_map(|entry| entry.endpoints.iter())
            .collect();

        let endpoint = match &self.connection.region {
            Some(region) => endpoints.iter().find(|e| {
                e.region
                    .as_deref()
                    .is_some_and(|r| r.eq_ignore_ascii_case(region))
            }),
            None => endpoints.first(),
        }
        .ok_or_else(|| {
            CloudError::invalid_response(PROVIDER, "no object-store endpoint in service catalog")
        })?;

        let url = if self.connection.servicenet {
            endpoint.internal_url.clone()
        } else {
            endpoint.public_url.clone()
        };
        url.ok_or_else(|| CloudError::invalid_response(PROVIDER, "endpoint has no URL"))
    }

    /// Cached session, authenticating on first use
    fn session(&self) -> Result<AuthSession> {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate()?;
        *guard = Some(session.clone());
        Ok(session)
    }

    fn request(&self, method: Method, path: &str, query: &str) -> Result<RequestBuilder> {
        let session = self.session()?;
        let mut url = session.storage_url.trim_end_matches('/').to_string();
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        Ok(self
            .client
            .request(method, url)
            .header("X-Auth-Token", session.token))
    }

    fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .map_err(|e| http::request_error(operation, e))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // Token expired; the retry re-authenticates
            *self.session.lock().unwrap_or_else(|e| e.into_inner()) = None;
        }
        http::check_status(operation, response)
    }
}

fn object_path(container: &str, key: &str) -> String {
    format!("{}/{}", encode_path(container), encode_path(key))
}

fn with_delete_at(builder: RequestBuilder, delete_at: Option<i64>) -> RequestBuilder {
    match delete_at {
        Some(at) => builder.header("X-Delete-At", at.to_string()),
        None => builder,
    }
}

impl SwiftApi for RealSwiftApi {
    fn ensure_container(&self, container: &str) -> Result<()> {
        let operation = format!("Create container '{}'", container);
        let builder = self.request(Method::PUT, &encode_path(container), "")?;
        self.send(&operation, builder)?;
        Ok(())
    }

    fn put_file(
        &self,
        container: &str,
        key: &str,
        source: &Path,
        size: u64,
        md5_hex: &str,
        delete_at: Option<i64>,
    ) -> Result<()> {
        let operation = format!("PUT '{}/{}'", container, key);
        let file = File::open(source).map_err(|e| CloudError::io(source, e))?;
        let builder = self
            .request(Method::PUT, &object_path(container, key), "")?
            .header("ETag", md5_hex)
            .body(Body::sized(file, size));
        self.send(&operation, with_delete_at(builder, delete_at))?;
        Ok(())
    }

    fn put_segment(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        md5_hex: &str,
        delete_at: Option<i64>,
    ) -> Result<String> {
        let operation = format!("PUT segment '{}/{}'", container, key);
        let builder = self
            .request(Method::PUT, &object_path(container, key), "")?
            .header("ETag", md5_hex)
            .body(data.to_vec());
        let response = self.send(&operation, with_delete_at(builder, delete_at))?;
        Ok(http::header_value(&response, "etag").unwrap_or_else(|| md5_hex.to_string()))
    }

    fn put_manifest(
        &self,
        container: &str,
        key: &str,
        segments: &[SloSegment],
        delete_at: Option<i64>,
    ) -> Result<()> {
        let operation = format!("PUT manifest '{}/{}'", container, key);
        let builder = self
            .request(
                Method::PUT,
                &object_path(container, key),
                "multipart-manifest=put",
            )?
            .json(segments);
        self.send(&operation, with_delete_at(builder, delete_at))?;
        Ok(())
    }

    fn list_objects(
        &self,
        container: &str,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SwiftEntry>> {
        let operation = format!("List '{}/{}'", container, prefix);
        let mut query = format!("format=json&limit={}&prefix={}", limit, encode_query(prefix));
        if let Some(marker) = marker {
            query.push_str(&format!("&marker={}", encode_query(marker)));
        }
        let builder = self.request(Method::GET, &encode_path(container), &query)?;
        let response = self.send(&operation, builder)?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        response.json().map_err(|e| http::request_error(&operation, e))
    }

    fn bulk_delete(&self, paths: &[String]) -> Result<BulkDeleteResult> {
        let operation = format!("Bulk delete {} object(s)", paths.len());
        let body = paths
            .iter()
            .map(|p| encode_path(p))
            .collect::<Vec<_>>()
            .join("\n");
        let builder = self
            .request(Method::POST, "", "bulk-delete")?
            .header("Content-Type", "text/plain")
            .header("Accept", "application/json")
            .body(body);
        let response: BulkDeleteResponse = self
            .send(&operation, builder)?
            .json()
            .map_err(|e| http::request_error(&operation, e))?;

        Ok(BulkDeleteResult {
            response_status: response.response_status,
            errors: response
                .errors
                .into_iter()
                .map(|(key, reason)| ItemFailure { key, reason })
                .collect(),
        })
    }

    fn delete_manifest(&self, container: &str, key: &str) -> Result<()> {
        let operation = format!("DELETE manifest '{}/{}'", container, key);
        let builder = self.request(
            Method::DELETE,
            &object_path(container, key),
            "multipart-manifest=delete",
        )?;
        match self.send(&operation, builder) {
            Ok(_) => Ok(()),
            Err(CloudError::Transport { message, .. }) if message.starts_with("HTTP 404") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn head_object(&self, container: &str, key: &str) -> Result<ObjectMetadata> {
        let operation = format!("HEAD '{}/{}'", container, key);
        let builder = self.request(Method::HEAD, &object_path(container, key), "")?;
        let response = self.send(&operation, builder)?;
        let raw: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        Ok(metadata_from_headers(raw))
    }
}

/// Normalize Swift object headers
pub fn metadata_from_headers(raw: HashMap<String, String>) -> ObjectMetadata {
    let is_manifest = raw
        .get("x-static-large-object")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let delete_at = raw
        .get("x-delete-at")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    ObjectMetadata {
        is_manifest,
        delete_at,
        raw,
        ..Default::default()
    }
}

/// Unix time for `X-Delete-At`
pub fn delete_at_header(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|t| t.timestamp())
}

/// In-memory Swift account for tests
pub mod mock {
    use super::*;
    use crate::cloud::mock::{MockStore, StoredObject};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    /// Mock Swift account; objects are stored under `container/key`
    ///
    /// Rejects PUTs whose `ETag` does not match the body, refuses reads and writes
    /// on containers that were never created, and validates manifests against the
    /// stored segments.
    #[derive(Clone, Default)]
    pub struct MockSwiftApi {
        pub store: MockStore,
        containers: Arc<Mutex<BTreeSet<String>>>,
    }

    impl MockSwiftApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_object(self, container: &str, key: &str, data: &[u8]) -> Self {
            self.containers.lock().unwrap().insert(container.to_string());
            self.store.insert(
                &format!("{}/{}", container, key),
                StoredObject::new(data.to_vec(), digest::md5_hex(data)),
            );
            self
        }

        pub fn has_container(&self, container: &str) -> bool {
            self.containers.lock().unwrap().contains(container)
        }

        /// Stored object at `container/key`
        pub fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
            self.store.get(&format!("{}/{}", container, key))
        }

        fn require_container(&self, container: &str) -> Result<()> {
            if self.has_container(container) {
                Ok(())
            } else {
                Err(CloudError::transport(
                    format!("container '{}'", container),
                    "HTTP 404 Not Found",
                ))
            }
        }

        fn store_object(
            &self,
            container: &str,
            key: &str,
            data: Vec<u8>,
            md5_hex: &str,
            delete_at: Option<i64>,
        ) -> Result<String> {
            self.require_container(container)?;
            let actual = digest::md5_hex(&data);
            if actual != md5_hex {
                return Err(CloudError::transport("put", "HTTP 422 Unprocessable Entity"));
            }
            let mut object = StoredObject::new(data, actual.clone());
            if let Some(at) = delete_at {
                object.headers.insert("x-delete-at".to_string(), at.to_string());
            }
            self.store.insert(&format!("{}/{}", container, key), object);
            Ok(actual)
        }
    }

    impl SwiftApi for MockSwiftApi {
        fn ensure_container(&self, container: &str) -> Result<()> {
            self.store.call("ensure_container", container)?;
            self.containers.lock().unwrap().insert(container.to_string());
            Ok(())
        }

        fn put_file(
            &self,
            container: &str,
            key: &str,
            source: &Path,
            _size: u64,
            md5_hex: &str,
            delete_at: Option<i64>,
        ) -> Result<()> {
            self.store.call("put_file", key)?;
            let data = std::fs::read(source).map_err(|e| CloudError::io(source, e))?;
            self.store_object(container, key, data, md5_hex, delete_at)?;
            Ok(())
        }

        fn put_segment(
            &self,
            container: &str,
            key: &str,
            data: &[u8],
            md5_hex: &str,
            delete_at: Option<i64>,
        ) -> Result<String> {
            self.store.call("put_segment", key)?;
            self.store_object(container, key, data.to_vec(), md5_hex, delete_at)
        }

        fn put_manifest(
            &self,
            container: &str,
            key: &str,
            segments: &[SloSegment],
            delete_at: Option<i64>,
        ) -> Result<()> {
            self.store.call("put_manifest", key)?;
            self.require_container(container)?;

            let mut data = Vec::new();
            let mut etags = String::new();
            for segment in segments {
                let stored = self
                    .store
                    .get(segment.path.trim_start_matches('/'))
                    .ok_or_else(|| CloudError::transport("put_manifest", "HTTP 400 missing segment"))?;
                if stored.etag != segment.etag || stored.data.len() as u64 != segment.size_bytes {
                    return Err(CloudError::transport("put_manifest", "HTTP 400 segment mismatch"));
                }
                data.extend_from_slice(&stored.data);
                etags.push_str(&segment.etag);
            }

            let mut object = StoredObject::new(data, digest::md5_hex(etags.as_bytes()));
            object
                .headers
                .insert("x-static-large-object".to_string(), "True".to_string());
            object.headers.insert(
                "x-manifest-segments".to_string(),
                segments
                    .iter()
                    .map(|s| s.path.trim_start_matches('/'))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            if let Some(at) = delete_at {
                object.headers.insert("x-delete-at".to_string(), at.to_string());
            }
            self.store.insert(&format!("{}/{}", container, key), object);
            Ok(())
        }

        fn list_objects(
            &self,
            container: &str,
            prefix: &str,
            marker: Option<&str>,
            limit: usize,
        ) -> Result<Vec<SwiftEntry>> {
            self.store
                .call("list_objects", marker.unwrap_or_default().to_string())?;
            self.require_container(container)?;
            let scope = format!("{}/", container);
            let full_marker = marker.map(|m| format!("{}{}", scope, m));
            Ok(self
                .store
                .page(&format!("{}{}", scope, prefix), full_marker.as_deref(), limit)
                .into_iter()
                .map(|(path, object)| SwiftEntry {
                    name: path[scope.len()..].to_string(),
                    hash: object.etag,
                    bytes: object.data.len() as u64,
                })
                .collect())
        }

        fn bulk_delete(&self, paths: &[String]) -> Result<BulkDeleteResult> {
            if paths.len() > 10_000 {
                return Err(CloudError::transport("bulk_delete", "HTTP 413 too many deletes"));
            }
            self.store.call("bulk_delete", paths.len().to_string())?;

            let mut errors = Vec::new();
            for path in paths {
                let stored_path = path.trim_start_matches('/');
                match self.store.take_item_failure(stored_path) {
                    Some(reason) => errors.push(ItemFailure {
                        key: path.clone(),
                        reason,
                    }),
                    None => {
                        self.store.remove(stored_path);
                    }
                }
            }
            Ok(BulkDeleteResult {
                response_status: if errors.is_empty() {
                    "200 OK".to_string()
                } else {
                    "400 Bad Request".to_string()
                },
                errors,
            })
        }

        fn delete_manifest(&self, container: &str, key: &str) -> Result<()> {
            self.store.call("delete_manifest", key)?;
            let path = format!("{}/{}", container, key);
            if let Some(manifest) = self.store.get(&path) {
                if let Some(segments) = manifest.headers.get("x-manifest-segments") {
                    for segment in segments.split(',').filter(|s| !s.is_empty()) {
                        self.store.remove(segment);
                    }
                }
                self.store.remove(&path);
            }
            Ok(())
        }

        fn head_object(&self, container: &str, key: &str) -> Result<ObjectMetadata> {
            self.store.call("head_object", key)?;
            let object = self
                .store
                .get(&format!("{}/{}", container, key))
                .ok_or_else(|| CloudError::transport("head_object", "HTTP 404 Not Found"))?;
            let mut raw = object.headers.clone();
            raw.insert("etag".to_string(), object.etag.clone());
            Ok(metadata_from_headers(raw))
        }
    }
}
