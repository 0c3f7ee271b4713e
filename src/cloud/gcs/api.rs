//! Google Cloud Storage operations abstraction for testability
//!
//! Uploads go through the XML API (which speaks the S3 multipart dialect);
//! listings, metadata and batch deletes go through the JSON API.

#![allow(dead_code)]

use super::batch;
use crate::cloud::http::{self, encode_path, encode_query};
use crate::cloud::s3::xml::{self, ErrorDocument};
use crate::cloud::segments::ChunkSpec;
use crate::cloud::{CloudError, ItemFailure, ObjectMetadata, Result};
use crate::utils::digest;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

const PROVIDER: &str = "GCS";
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Per-object attributes sent with uploads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcsObjectOptions {
    pub storage_class: Option<String>,
    /// Written as `x-goog-custom-time`; lifecycle rules delete from it
    pub custom_time: Option<DateTime<Utc>>,
}

/// One object from a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsEntry {
    pub name: String,
    /// Hex MD5; composite objects have none
    pub md5_hex: Option<String>,
    pub size: u64,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GcsListPage {
    pub entries: Vec<GcsEntry>,
    pub next_page_token: Option<String>,
}

/// Abstraction for GCS requests, enabling mocking in tests
pub trait GcsApi: Send + Sync {
    fn put_object(
        &self,
        key: &str,
        source: &Path,
        size: u64,
        content_md5: &str,
        options: &GcsObjectOptions,
    ) -> Result<()>;

    fn initiate_multipart(&self, key: &str, options: &GcsObjectOptions) -> Result<String>;

    fn upload_part(&self, key: &str, upload_id: &str, part: &ChunkSpec, data: &[u8])
        -> Result<String>;

    fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[(u32, String)])
        -> Result<()>;

    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;

    fn list_objects(&self, prefix: &str, page_token: Option<&str>) -> Result<GcsListPage>;

    /// Batch delete; missing objects are not failures
    fn batch_delete(&self, keys: &[String]) -> Result<Vec<ItemFailure>>;

    fn get_metadata(&self, key: &str) -> Result<ObjectMetadata>;
}

#[derive(Debug, Clone)]
pub struct GcsConnection {
    pub bucket: String,
    pub access_token: String,
    pub endpoint: String,
    pub timeout: Duration,
}

/// Real GCS client authenticated with an OAuth bearer token
pub struct RealGcsApi {
    client: Client,
    connection: GcsConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<JsonObject>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonObject {
    name: String,
    md5_hash: Option<String>,
    /// Decimal string
    size: Option<String>,
    storage_class: Option<String>,
    custom_time: Option<DateTime<Utc>>,
    kms_key_name: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl JsonObject {
    fn into_entry(self) -> GcsEntry {
        GcsEntry {
            md5_hex: self.md5_hash.as_deref().and_then(digest::base64_to_hex),
            size: self
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            storage_class: self.storage_class,
            name: self.name,
        }
    }

    fn into_metadata(self) -> ObjectMetadata {
        let mut raw: HashMap<String, String> = self
            .metadata
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        if let Some(md5) = &self.md5_hash {
            raw.insert("md5hash".to_string(), md5.clone());
        }
        ObjectMetadata {
            encryption: self.kms_key_name,
            storage_class: self.storage_class,
            delete_at: self.custom_time,
            is_manifest: false,
            raw,
        }
    }
}

impl RealGcsApi {
    pub fn new(connection: GcsConnection) -> Result<Self> {
        Ok(Self {
            client: http::build_client(connection.timeout)?,
            connection,
        })
    }

    fn base(&self) -> &str {
        self.connection.endpoint.trim_end_matches('/')
    }

    fn xml_url(&self, key: &str, query: &str) -> String {
        let mut url = format!(
            "{}/{}/{}",
            self.base(),
            encode_path(&self.connection.bucket),
            encode_path(key)
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.connection.access_token)
    }

    fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .map_err(|e| http::request_error(operation, e))?;
        http::check_status(operation, response)
    }
}

fn object_headers(builder: RequestBuilder, options: &GcsObjectOptions) -> RequestBuilder {
    let mut builder = builder;
    if let Some(class) = &options.storage_class {
        builder = builder.header("x-goog-storage-class", class);
    }
    if let Some(time) = options.custom_time {
        builder = builder.header(
            "x-goog-custom-time",
            time.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    builder
}

impl GcsApi for RealGcsApi {
    fn put_object(
        &self,
        key: &str,
        source: &Path,
        size: u64,
        content_md5: &str,
        options: &GcsObjectOptions,
    ) -> Result<()> {
        let operation = format!("PUT '{}'", key);
        let file = File::open(source).map_err(|e| CloudError::io(source, e))?;
        let builder = self
            .request(Method::PUT, self.xml_url(key, ""))
            .header("Content-MD5", content_md5)
            .body(Body::sized(file, size));
        self.send(&operation, object_headers(builder, options))?;
        Ok(())
    }

    fn initiate_multipart(&self, key: &str, options: &GcsObjectOptions) -> Result<String> {
        let operation = format!("Initiate multipart upload '{}'", key);
        let builder = self
            .request(Method::POST, self.xml_url(key, "uploads"))
            .header("Content-Length", "0");
        let response = self.send(&operation, object_headers(builder, options))?;
        let body = http::read_text(&operation, response)?;
        let result: xml::InitiateMultipartUploadResult = xml::parse(PROVIDER, &body)?;
        Ok(result.upload_id)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part: &ChunkSpec,
        data: &[u8],
    ) -> Result<String> {
        let operation = format!("Upload part {} of '{}'", part.index, key);
        let query = format!(
            "partNumber={}&uploadId={}",
            part.index,
            encode_query(upload_id)
        );
        let builder = self
            .request(Method::PUT, self.xml_url(key, &query))
            .header("Content-MD5", part.md5_base64())
            .body(data.to_vec());
        let response = self.send(&operation, builder)?;
        http::header_value(&response, "etag").ok_or_else(|| {
            CloudError::invalid_response(PROVIDER, format!("{}: response has no ETag", operation))
        })
    }

    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Result<()> {
        let operation = format!("Complete multipart upload '{}'", key);
        let document = xml::CompleteMultipartUpload {
            parts: parts
                .iter()
                .map(|(part_number, etag)| xml::CompletedPartXml {
                    part_number: *part_number,
                    etag: format!("\"{}\"", etag),
                })
                .collect(),
        };
        let query = format!("uploadId={}", encode_query(upload_id));
        let builder = self
            .request(Method::POST, self.xml_url(key, &query))
            .body(xml::render(PROVIDER, &document)?);
        let body = http::read_text(&operation, self.send(&operation, builder)?)?;
        if let Some(error) = ErrorDocument::detect(&body) {
            return Err(CloudError::transport(
                operation,
                format!("{}: {}", error.code, error.message),
            ));
        }
        Ok(())
    }

    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        let operation = format!("Abort multipart upload '{}'", key);
        let query = format!("uploadId={}", encode_query(upload_id));
        self.send(&operation, self.request(Method::DELETE, self.xml_url(key, &query)))?;
        Ok(())
    }

    fn list_objects(&self, prefix: &str, page_token: Option<&str>) -> Result<GcsListPage> {
        let operation = format!("List objects '{}'", prefix);
        let mut url = format!(
            "{}/storage/v1/b/{}/o?prefix={}&fields=items(name,md5Hash,size,storageClass),nextPageToken",
            self.base(),
            encode_query(&self.connection.bucket),
            encode_query(prefix)
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", encode_query(token)));
        }
        let response: ListResponse = self
            .send(&operation, self.request(Method::GET, url))?
            .json()
            .map_err(|e| http::request_error(&operation, e))?;

        Ok(GcsListPage {
            entries: response.items.into_iter().map(JsonObject::into_entry).collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    fn batch_delete(&self, keys: &[String]) -> Result<Vec<ItemFailure>> {
        let operation = format!("Batch delete {} object(s)", keys.len());
        let boundary = format!("batch_{}", Utc::now().timestamp_micros());
        let body = batch::delete_request_body(&self.connection.bucket, keys, &boundary);
        let builder = self
            .request(Method::POST, format!("{}/batch/storage/v1", self.base()))
            .header(
                "Content-Type",
                format!("multipart/mixed; boundary={}", boundary),
            )
            .body(body);
        let response = self.send(&operation, builder)?;

        let response_boundary = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .and_then(batch::boundary_from_content_type)
            .ok_or_else(|| {
                CloudError::invalid_response(PROVIDER, "batch response is not multipart")
            })?;
        let text = http::read_text(&operation, response)?;
        let parts = batch::parse_response(&text, &response_boundary);
        if parts.len() != keys.len() {
            return Err(CloudError::invalid_response(
                PROVIDER,
                format!(
                    "batch response has {} part(s) for {} request(s)",
                    parts.len(),
                    keys.len()
                ),
            ));
        }

        Ok(parts
            .into_iter()
            .filter(|p| !p.is_success() && p.status != 404)
            .filter_map(|p| {
                keys.get(p.index).map(|key| ItemFailure {
                    key: key.clone(),
                    reason: format!("{} {}", p.status, p.reason),
                })
            })
            .collect())
    }

    fn get_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let operation = format!("Get metadata '{}'", key);
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base(),
            encode_query(&self.connection.bucket),
            encode_query(key)
        );
        let object: JsonObject = self
            .send(&operation, self.request(Method::GET, url))?
            .json()
            .map_err(|e| http::request_error(&operation, e))?;
        Ok(object.into_metadata())
    }
}

/// In-memory GCS bucket for tests
pub mod mock {
    use super::*;
    use crate::cloud::mock::{MockStore, StoredObject};
    use std::sync::{Arc, Mutex};

    /// Mock GCS bucket
    ///
    /// Pages listings with opaque tokens and rejects batches over 100 requests.
    #[derive(Clone)]
    pub struct MockGcsApi {
        pub store: MockStore,
        page_size: usize,
        uploads: Arc<Mutex<HashMap<String, (String, HashMap<u32, Vec<u8>>)>>>,
    }

    impl Default for MockGcsApi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockGcsApi {
        pub fn new() -> Self {
            Self {
                store: MockStore::new(),
                page_size: 1_000,
                uploads: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        pub fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size;
            self
        }

        pub fn with_object(self, key: &str, data: &[u8]) -> Self {
            self.store
                .insert(key, StoredObject::new(data.to_vec(), digest::md5_hex(data)));
            self
        }

        fn stored(data: Vec<u8>, options: &GcsObjectOptions) -> StoredObject {
            let mut object = StoredObject::new(data.clone(), digest::md5_hex(&data));
            object.storage_class = options.storage_class.clone();
            if let Some(time) = options.custom_time {
                object
                    .headers
                    .insert("customtime".to_string(), time.to_rfc3339());
            }
            object
        }
    }

    impl GcsApi for MockGcsApi {
        fn put_object(
            &self,
            key: &str,
            source: &Path,
            _size: u64,
            content_md5: &str,
            options: &GcsObjectOptions,
        ) -> Result<()> {
            self.store.call("put_object", key)?;
            let data = std::fs::read(source).map_err(|e| CloudError::io(source, e))?;
            if digest::md5_base64(&data) != content_md5 {
                return Err(CloudError::transport("put_object", "BadDigest"));
            }
            self.store.insert(key, Self::stored(data, options));
            Ok(())
        }

        fn initiate_multipart(&self, key: &str, options: &GcsObjectOptions) -> Result<String> {
            self.store.call("initiate_multipart", key)?;
            let mut uploads = self.uploads.lock().unwrap();
            let upload_id = format!("gcs-upload-{}", uploads.len() + 1);
            let class = options.storage_class.clone().unwrap_or_default();
            uploads.insert(upload_id.clone(), (class, HashMap::new()));
            Ok(upload_id)
        }

        fn upload_part(
            &self,
            key: &str,
            upload_id: &str,
            part: &ChunkSpec,
            data: &[u8],
        ) -> Result<String> {
            self.store
                .call("upload_part", format!("{}#{}", key, part.index))?;
            if digest::md5_digest(data) != part.content_md5 {
                return Err(CloudError::transport("upload_part", "BadDigest"));
            }
            let mut uploads = self.uploads.lock().unwrap();
            let (_, parts) = uploads
                .get_mut(upload_id)
                .ok_or_else(|| CloudError::transport("upload_part", "NoSuchUpload"))?;
            parts.insert(part.index, data.to_vec());
            Ok(digest::md5_hex(data))
        }

        fn complete_multipart(
            &self,
            key: &str,
            upload_id: &str,
            parts: &[(u32, String)],
        ) -> Result<()> {
            self.store.call("complete_multipart", key)?;
            if parts.windows(2).any(|w| w[0].0 >= w[1].0) {
                return Err(CloudError::transport("complete_multipart", "InvalidPartOrder"));
            }
            let (class, stored_parts) = self
                .uploads
                .lock()
                .unwrap()
                .remove(upload_id)
                .ok_or_else(|| CloudError::transport("complete_multipart", "NoSuchUpload"))?;

            let mut data = Vec::new();
            for (number, _) in parts {
                let bytes = stored_parts
                    .get(number)
                    .ok_or_else(|| CloudError::transport("complete_multipart", "InvalidPart"))?;
                data.extend_from_slice(bytes);
            }
            // XML multipart objects carry no whole-object MD5
            let mut object = StoredObject::new(data, String::new());
            object.storage_class = Some(class).filter(|c| !c.is_empty());
            self.store.insert(key, object);
            Ok(())
        }

        fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
            self.store.call("abort_multipart", key)?;
            self.uploads.lock().unwrap().remove(upload_id);
            Ok(())
        }

        fn list_objects(&self, prefix: &str, page_token: Option<&str>) -> Result<GcsListPage> {
            self.store
                .call("list_objects", page_token.unwrap_or_default().to_string())?;
            // Tokens are opaque to callers; the mock encodes the last key in them
            let after = page_token.map(|t| t.trim_start_matches("token:"));
            let mut page = self.store.page(prefix, after, self.page_size + 1);
            let more = page.len() > self.page_size;
            page.truncate(self.page_size);

            let next_page_token = if more {
                page.last().map(|(key, _)| format!("token:{}", key))
            } else {
                None
            };
            Ok(GcsListPage {
                entries: page
                    .into_iter()
                    .map(|(name, object)| GcsEntry {
                        md5_hex: Some(object.etag).filter(|e| !e.is_empty()),
                        size: object.data.len() as u64,
                        storage_class: object.storage_class,
                        name,
                    })
                    .collect(),
                next_page_token,
            })
        }

        fn batch_delete(&self, keys: &[String]) -> Result<Vec<ItemFailure>> {
            if keys.len() > 100 {
                return Err(CloudError::transport("batch_delete", "HTTP 400 too many requests"));
            }
            self.store.call("batch_delete", keys.len().to_string())?;

            let mut failures = Vec::new();
            for key in keys {
                match self.store.take_item_failure(key) {
                    Some(reason) => failures.push(ItemFailure {
                        key: key.clone(),
                        reason,
                    }),
                    None => {
                        self.store.remove(key);
                    }
                }
            }
            Ok(failures)
        }

        fn get_metadata(&self, key: &str) -> Result<ObjectMetadata> {
            self.store.call("get_metadata", key)?;
            let object = self
                .store
                .get(key)
                .ok_or_else(|| CloudError::transport("get_metadata", "HTTP 404 Not Found"))?;
            Ok(ObjectMetadata {
                storage_class: object.storage_class.clone(),
                delete_at: object
                    .headers
                    .get("customtime")
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc)),
                raw: object.headers.clone(),
                ..Default::default()
            })
        }
    }
}
