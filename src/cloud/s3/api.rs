//! S3 REST operations abstraction for testability
//!
//! [`S3Backend`](super::S3Backend) drives uploads, listings and deletes through
//! this trait. [`RealS3Api`] signs requests and talks HTTP; [`mock::MockS3Api`]
//! keeps objects in memory.

#![allow(dead_code)]

use super::signer::{Signer, UNSIGNED_PAYLOAD};
use super::xml::{self, ErrorDocument};
use crate::cloud::http::{self, encode_path, encode_query};
use crate::cloud::segments::ChunkSpec;
use crate::cloud::{CloudError, ItemFailure, ObjectMetadata, Result, UploadOptions};
use crate::utils::digest;
use chrono::Utc;
use reqwest::blocking::{Body, Client, RequestBuilder};
use reqwest::{Method, Url};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

const PROVIDER: &str = "S3";

/// One object from a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Entry {
    pub key: String,
    /// ETag with quotes stripped
    pub etag: String,
    pub size: u64,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct S3ListPage {
    pub entries: Vec<S3Entry>,
    pub is_truncated: bool,
}

/// Abstraction for S3 requests, enabling mocking in tests
pub trait S3Api: Send + Sync {
    /// Single PUT of a whole file
    fn put_object(
        &self,
        key: &str,
        source: &Path,
        size: u64,
        content_md5: &str,
        options: &UploadOptions,
    ) -> Result<()>;

    /// Start a multipart upload, returning its upload id
    fn initiate_multipart(&self, key: &str, options: &UploadOptions) -> Result<String>;

    /// Upload one part, returning its ETag
    fn upload_part(&self, key: &str, upload_id: &str, part: &ChunkSpec, data: &[u8])
        -> Result<String>;

    /// Complete a multipart upload from `(part number, etag)` pairs in ascending order
    fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[(u32, String)])
        -> Result<()>;

    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;

    /// One page of keys under `prefix`, starting after `marker`
    fn list_objects(&self, prefix: &str, marker: Option<&str>) -> Result<S3ListPage>;

    /// Quiet multi-object delete; returns the per-key failures of the response
    fn delete_objects(&self, keys: &[String]) -> Result<Vec<ItemFailure>>;

    fn head_object(&self, key: &str) -> Result<ObjectMetadata>;
}

/// Connection settings for [`RealS3Api`]
#[derive(Debug, Clone)]
pub struct S3Connection {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint (S3-compatible services); defaults to AWS
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

/// Real S3 client using path-style URLs and SigV4
pub struct RealS3Api {
    client: Client,
    signer: Signer,
    base_url: Url,
    bucket: String,
}

impl RealS3Api {
    pub fn new(connection: &S3Connection) -> Result<Self> {
        let endpoint = connection
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", connection.region));
        let base_url = Url::parse(endpoint.trim_end_matches('/')).map_err(|e| {
            CloudError::Config(format!("invalid S3 endpoint '{}': {}", endpoint, e))
        })?;

        Ok(Self {
            client: http::build_client(connection.timeout)?,
            signer: Signer::new(
                &connection.access_key_id,
                &connection.secret_access_key,
                &connection.region,
            ),
            base_url,
            bucket: connection.bucket.clone(),
        })
    }

    fn url(&self, key: Option<&str>, query: &str) -> Url {
        let mut path = format!("/{}", encode_path(&self.bucket));
        if let Some(key) = key {
            path.push('/');
            path.push_str(&encode_path(key));
        }
        let mut url = self.base_url.clone();
        url.set_path(&path);
        url.set_query(if query.is_empty() { None } else { Some(query) });
        url
    }

    /// Build a signed request; `headers` are included in the signature
    fn request(&self, method: Method, url: Url, headers: Vec<(String, String)>) -> RequestBuilder {
        let auth = self
            .signer
            .sign(method.as_str(), &url, &headers, UNSIGNED_PAYLOAD, Utc::now());
        let mut builder = self.client.request(method, url);
        for (name, value) in headers.into_iter().chain(auth) {
            if name != "host" {
                builder = builder.header(name, value);
            }
        }
        builder
    }

    fn send(&self, operation: &str, builder: RequestBuilder) -> Result<reqwest::blocking::Response> {
        let response = builder
            .send()
            .map_err(|e| http::request_error(operation, e))?;
        http::check_status(operation, response)
    }
}

fn upload_headers(options: &UploadOptions) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(class) = &options.storage_class {
        headers.push(("x-amz-storage-class".to_string(), class.clone()));
    }
    if let Some(encryption) = &options.encryption {
        headers.push(("x-amz-server-side-encryption".to_string(), encryption.clone()));
    }
    headers
}

impl S3Api for RealS3Api {
    fn put_object(
        &self,
        key: &str,
        source: &Path,
        size: u64,
        content_md5: &str,
        options: &UploadOptions,
    ) -> Result<()> {
        let operation = format!("PUT '{}'", key);
        let file = File::open(source).map_err(|e| CloudError::io(source, e))?;

        let mut headers = upload_headers(options);
        headers.push(("content-md5".to_string(), content_md5.to_string()));

        let builder = self
            .request(Method::PUT, self.url(Some(key), ""), headers)
            .body(Body::sized(file, size));
        self.send(&operation, builder)?;
        Ok(())
    }

    fn initiate_multipart(&self, key: &str, options: &UploadOptions) -> Result<String> {
        let operation = format!("Initiate multipart upload '{}'", key);
        let builder = self.request(
            Method::POST,
            self.url(Some(key), "uploads"),
            upload_headers(options),
        );
        let body = http::read_text(&operation, self.send(&operation, builder)?)?;
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
        let headers = vec![("content-md5".to_string(), part.md5_base64())];
        let builder = self
            .request(Method::PUT, self.url(Some(key), &query), headers)
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
        let body = xml::render(PROVIDER, &document)?;
        let query = format!("uploadId={}", encode_query(upload_id));
        let builder = self
            .request(Method::POST, self.url(Some(key), &query), Vec::new())
            .body(body);
        let response_body = http::read_text(&operation, self.send(&operation, builder)?)?;

        // A 200 can still carry an error document
        if let Some(error) = ErrorDocument::detect(&response_body) {
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
        let builder = self.request(Method::DELETE, self.url(Some(key), &query), Vec::new());
        self.send(&operation, builder)?;
        Ok(())
    }

    fn list_objects(&self, prefix: &str, marker: Option<&str>) -> Result<S3ListPage> {
        let operation = format!("List objects '{}'", prefix);
        let mut query = format!("prefix={}", encode_query(prefix));
        if let Some(marker) = marker {
            query.push_str(&format!("&marker={}", encode_query(marker)));
        }
        let builder = self.request(Method::GET, self.url(None, &query), Vec::new());
        let body = http::read_text(&operation, self.send(&operation, builder)?)?;
        let result: xml::ListBucketResult = xml::parse(PROVIDER, &body)?;

        Ok(S3ListPage {
            is_truncated: result.is_truncated,
            entries: result
                .contents
                .into_iter()
                .map(|entry| S3Entry {
                    key: entry.key,
                    etag: entry.etag.trim_matches('"').to_string(),
                    size: entry.size,
                    storage_class: entry.storage_class,
                })
                .collect(),
        })
    }

    fn delete_objects(&self, keys: &[String]) -> Result<Vec<ItemFailure>> {
        let operation = format!("Delete {} object(s)", keys.len());
        let document = xml::DeleteRequest {
            quiet: true,
            objects: keys
                .iter()
                .map(|key| xml::ObjectIdentifier { key: key.clone() })
                .collect(),
        };
        let body = xml::render(PROVIDER, &document)?;
        let headers = vec![(
            "content-md5".to_string(),
            digest::md5_base64(body.as_bytes()),
        )];
        let builder = self
            .request(Method::POST, self.url(None, "delete"), headers)
            .body(body);
        let response_body = http::read_text(&operation, self.send(&operation, builder)?)?;
        if response_body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let result: xml::DeleteResult = xml::parse(PROVIDER, &response_body)?;
        Ok(result
            .errors
            .into_iter()
            .filter(|e| e.code != "NoSuchKey")
            .map(|e| ItemFailure {
                key: e.key,
                reason: format!("{}: {}", e.code, e.message),
            })
            .collect())
    }

    fn head_object(&self, key: &str) -> Result<ObjectMetadata> {
        let operation = format!("HEAD '{}'", key);
        let builder = self.request(Method::HEAD, self.url(Some(key), ""), Vec::new());
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

        Ok(ObjectMetadata {
            encryption: raw.get("x-amz-server-side-encryption").cloned(),
            storage_class: raw.get("x-amz-storage-class").cloned(),
            raw,
            ..Default::default()
        })
    }
}

/// In-memory S3 for tests
pub mod mock {
    use super::*;
    use crate::cloud::mock::{MockStore, StoredObject};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct PendingUpload {
        key: String,
        storage_class: Option<String>,
        parts: HashMap<u32, (String, Vec<u8>)>,
    }

    /// Mock S3 bucket
    ///
    /// Verifies every `Content-MD5` against the bytes received, requires part
    /// lists in ascending order on completion, and pages listings like S3.
    #[derive(Clone)]
    pub struct MockS3Api {
        pub store: MockStore,
        page_size: usize,
        uploads: Arc<Mutex<HashMap<String, PendingUpload>>>,
        next_upload: Arc<Mutex<u32>>,
    }

    impl Default for MockS3Api {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockS3Api {
        pub fn new() -> Self {
            Self {
                store: MockStore::new(),
                page_size: 1_000,
                uploads: Arc::new(Mutex::new(HashMap::new())),
                next_upload: Arc::new(Mutex::new(0)),
            }
        }

        /// Configure the number of keys returned per listing page
        pub fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size;
            self
        }

        /// Seed an object as if uploaded in one PUT
        pub fn with_object(self, key: &str, data: &[u8]) -> Self {
            self.store
                .insert(key, StoredObject::new(data.to_vec(), digest::md5_hex(data)));
            self
        }

        /// Multipart uploads started but neither completed nor aborted
        pub fn open_uploads(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    impl S3Api for MockS3Api {
        fn put_object(
            &self,
            key: &str,
            source: &Path,
            size: u64,
            content_md5: &str,
            options: &UploadOptions,
        ) -> Result<()> {
            self.store.call("put_object", key)?;
            let data = std::fs::read(source).map_err(|e| CloudError::io(source, e))?;
            if data.len() as u64 != size {
                return Err(CloudError::transport("put_object", "IncompleteBody"));
            }
            if digest::md5_base64(&data) != content_md5 {
                return Err(CloudError::transport("put_object", "BadDigest"));
            }

            let mut object = StoredObject::new(data.clone(), digest::md5_hex(&data));
            object.storage_class = options.storage_class.clone();
            if let Some(encryption) = &options.encryption {
                object
                    .headers
                    .insert("x-amz-server-side-encryption".to_string(), encryption.clone());
            }
            self.store.insert(key, object);
            Ok(())
        }

        fn initiate_multipart(&self, key: &str, options: &UploadOptions) -> Result<String> {
            self.store.call("initiate_multipart", key)?;
            let mut next = self.next_upload.lock().unwrap();
            *next += 1;
            let upload_id = format!("upload-{}", *next);
            self.uploads.lock().unwrap().insert(
                upload_id.clone(),
                PendingUpload {
                    key: key.to_string(),
                    storage_class: options.storage_class.clone(),
                    parts: HashMap::new(),
                },
            );
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
            let etag = digest::md5_hex(data);
            let mut uploads = self.uploads.lock().unwrap();
            let upload = uploads
                .get_mut(upload_id)
                .ok_or_else(|| CloudError::transport("upload_part", "NoSuchUpload"))?;
            upload.parts.insert(part.index, (etag.clone(), data.to_vec()));
            Ok(etag)
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

            let mut uploads = self.uploads.lock().unwrap();
            let upload = uploads
                .remove(upload_id)
                .ok_or_else(|| CloudError::transport("complete_multipart", "NoSuchUpload"))?;

            let mut data = Vec::new();
            let mut digests = Vec::new();
            for (number, etag) in parts {
                let (stored_etag, bytes) = upload
                    .parts
                    .get(number)
                    .ok_or_else(|| CloudError::transport("complete_multipart", "InvalidPart"))?;
                if stored_etag != etag {
                    return Err(CloudError::transport("complete_multipart", "InvalidPart"));
                }
                data.extend_from_slice(bytes);
                digests.extend_from_slice(&digest::md5_digest(bytes));
            }

            let etag = format!("{}-{}", digest::md5_hex(&digests), parts.len());
            let mut object = StoredObject::new(data, etag);
            object.storage_class = upload.storage_class;
            self.store.insert(&upload.key, object);
            Ok(())
        }

        fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
            self.store.call("abort_multipart", key)?;
            self.uploads.lock().unwrap().remove(upload_id);
            Ok(())
        }

        fn list_objects(&self, prefix: &str, marker: Option<&str>) -> Result<S3ListPage> {
            self.store
                .call("list_objects", marker.unwrap_or_default().to_string())?;
            let mut page = self.store.page(prefix, marker, self.page_size + 1);
            let is_truncated = page.len() > self.page_size;
            page.truncate(self.page_size);

            Ok(S3ListPage {
                is_truncated,
                entries: page
                    .into_iter()
                    .map(|(key, object)| S3Entry {
                        key,
                        etag: object.etag,
                        size: object.data.len() as u64,
                        storage_class: object.storage_class,
                    })
                    .collect(),
            })
        }

        fn delete_objects(&self, keys: &[String]) -> Result<Vec<ItemFailure>> {
            if keys.len() > 1_000 {
                return Err(CloudError::transport("delete_objects", "MalformedXML"));
            }
            self.store.call("delete_objects", keys.len().to_string())?;

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

        fn head_object(&self, key: &str) -> Result<ObjectMetadata> {
            self.store.call("head_object", key)?;
            let object = self
                .store
                .get(key)
                .ok_or_else(|| CloudError::transport("head_object", "HTTP 404 Not Found"))?;
            let mut raw = object.headers.clone();
            raw.insert("etag".to_string(), object.etag.clone());
            Ok(ObjectMetadata {
                encryption: object.headers.get("x-amz-server-side-encryption").cloned(),
                storage_class: object.storage_class.clone(),
                raw,
                ..Default::default()
            })
        }
    }
}
