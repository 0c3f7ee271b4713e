//! Dropbox API v2 operations abstraction for testability

#![allow(dead_code)]

use crate::cloud::http;
use crate::cloud::{CloudError, ObjectMetadata, Result};
use crate::utils::digest;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

const PROVIDER: &str = "Dropbox";
pub const API_URL: &str = "https://api.dropboxapi.com/2";
pub const CONTENT_URL: &str = "https://content.dropboxapi.com/2";

/// One file from a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropboxEntry {
    /// Absolute Dropbox path, as displayed
    pub path: String,
    pub content_hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DropboxListPage {
    pub entries: Vec<DropboxEntry>,
    pub cursor: String,
    pub has_more: bool,
}

/// State of a `delete_batch` job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteBatchStatus {
    InProgress(String),
    /// Per-entry outcome in request order: `None` on success, the error summary otherwise
    Complete(Vec<Option<String>>),
    Failed(String),
}

/// Abstraction for Dropbox requests, enabling mocking in tests
pub trait DropboxApi: Send + Sync {
    /// Single-request upload (overwrite mode)
    fn upload(&self, path: &str, source: &Path, size: u64, content_hash: &str) -> Result<()>;

    fn session_start(&self) -> Result<String>;

    fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
        content_hash: &str,
    ) -> Result<()>;

    /// Commit the session to `path`; `offset` is the total number of bytes sent
    fn session_finish(&self, session_id: &str, offset: u64, path: &str) -> Result<()>;

    /// Recursive listing of `folder`; a missing folder lists as empty
    fn list_folder(&self, folder: &str) -> Result<DropboxListPage>;

    fn list_folder_continue(&self, cursor: &str) -> Result<DropboxListPage>;

    fn delete_batch(&self, paths: &[String]) -> Result<DeleteBatchStatus>;

    fn delete_batch_check(&self, job_id: &str) -> Result<DeleteBatchStatus>;

    fn get_metadata(&self, path: &str) -> Result<ObjectMetadata>;
}

/// JSON for the `Dropbox-API-Arg` header: HTTP headers must stay ASCII, so
/// every non-ASCII character is written as a `\u` escape
pub fn api_arg(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[derive(Deserialize)]
struct ListFolderResult {
    entries: Vec<ListEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
struct ListEntry {
    #[serde(rename = ".tag")]
    tag: String,
    path_display: Option<String>,
    content_hash: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_summary: String,
}

fn into_page(result: ListFolderResult) -> DropboxListPage {
    DropboxListPage {
        entries: result
            .entries
            .into_iter()
            .filter(|e| e.tag == "file")
            .filter_map(|e| {
                e.path_display.map(|path| DropboxEntry {
                    path,
                    content_hash: e.content_hash.unwrap_or_default(),
                    size: e.size,
                })
            })
            .collect(),
        cursor: result.cursor,
        has_more: result.has_more,
    }
}

/// Parse a `delete_batch` launch or check result
pub fn parse_delete_batch(value: &Value) -> Result<DeleteBatchStatus> {
    let tag = value.get(".tag").and_then(Value::as_str).unwrap_or_default();
    match tag {
        "async_job_id" => value
            .get("async_job_id")
            .and_then(Value::as_str)
            .map(|id| DeleteBatchStatus::InProgress(id.to_string()))
            .ok_or_else(|| CloudError::invalid_response(PROVIDER, "async_job_id missing")),
        "in_progress" => Ok(DeleteBatchStatus::InProgress(String::new())),
        "complete" => {
            let entries = value
                .get("entries")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(DeleteBatchStatus::Complete(
                entries.iter().map(entry_failure).collect(),
            ))
        }
        "failed" => Ok(DeleteBatchStatus::Failed(value.to_string())),
        other => Err(CloudError::invalid_response(
            PROVIDER,
            format!("unexpected delete_batch status '{}'", other),
        )),
    }
}

/// `None` for a successful entry, otherwise its nested tags joined with `/`
fn entry_failure(entry: &Value) -> Option<String> {
    if entry.get(".tag").and_then(Value::as_str) != Some("failure") {
        return None;
    }
    let mut tags = Vec::new();
    let mut current = entry.get("failure");
    while let Some(node) = current {
        let Some(tag) = node.get(".tag").and_then(Value::as_str) else {
            break;
        };
        tags.push(tag.to_string());
        current = node.get(tag);
    }
    Some(if tags.is_empty() {
        "unknown".to_string()
    } else {
        tags.join("/")
    })
}

#[derive(Debug, Clone)]
pub struct DropboxConnection {
    pub access_token: String,
    pub timeout: Duration,
    /// RPC endpoint base, [`API_URL`] unless overridden
    pub api_url: String,
    /// Content endpoint base, [`CONTENT_URL`] unless overridden
    pub content_url: String,
}

impl DropboxConnection {
    pub fn new(access_token: &str, timeout: Duration) -> Self {
        Self {
            access_token: access_token.to_string(),
            timeout,
            api_url: API_URL.to_string(),
            content_url: CONTENT_URL.to_string(),
        }
    }
}

/// Real Dropbox client
pub struct RealDropboxApi {
    client: Client,
    access_token: String,
    api_url: String,
    content_url: String,
}

impl RealDropboxApi {
    pub fn new(connection: &DropboxConnection) -> Result<Self> {
        Ok(Self {
            client: http::build_client(connection.timeout)?,
            access_token: connection.access_token.clone(),
            api_url: connection.api_url.trim_end_matches('/').to_string(),
            content_url: connection.content_url.trim_end_matches('/').to_string(),
        })
    }

    fn rpc(&self, operation: &str, endpoint: &str, arg: Value) -> Result<Response> {
        let response = self
            .client
            .post(format!("{}/{}", self.api_url, endpoint))
            .bearer_auth(&self.access_token)
            .json(&arg)
            .send()
            .map_err(|e| http::request_error(operation, e))?;
        http::check_status(operation, response)
    }

    fn content(&self, endpoint: &str, arg: Value) -> RequestBuilder {
        self.client
            .post(format!("{}/{}", self.content_url, endpoint))
            .bearer_auth(&self.access_token)
            .header("Dropbox-API-Arg", api_arg(&arg))
            .header("Content-Type", "application/octet-stream")
    }

    fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .map_err(|e| http::request_error(operation, e))?;
        http::check_status(operation, response)
    }

    fn json(operation: &str, response: Response) -> Result<Value> {
        response.json().map_err(|e| http::request_error(operation, e))
    }
}

impl DropboxApi for RealDropboxApi {
    fn upload(&self, path: &str, source: &Path, size: u64, content_hash: &str) -> Result<()> {
        let operation = format!("Upload '{}'", path);
        let file = File::open(source).map_err(|e| CloudError::io(source, e))?;
        let arg = json!({
            "path": path,
            "mode": "overwrite",
            "mute": true,
            "content_hash": content_hash,
        });
        self.send(&operation, self.content("files/upload", arg).body(Body::sized(file, size)))?;
        Ok(())
    }

    fn session_start(&self) -> Result<String> {
        let operation = "Start upload session";
        let response = self.send(
            operation,
            self.content("files/upload_session/start", json!({ "close": false }))
                .body(Vec::new()),
        )?;
        Self::json(operation, response)?
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CloudError::invalid_response(PROVIDER, "session_id missing"))
    }

    fn session_append(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
        content_hash: &str,
    ) -> Result<()> {
        let operation = format!("Append to upload session at offset {}", offset);
        let arg = json!({
            "cursor": { "session_id": session_id, "offset": offset },
            "close": false,
            "content_hash": content_hash,
        });
        self.send(
            &operation,
            self.content("files/upload_session/append_v2", arg)
                .body(data.to_vec()),
        )?;
        Ok(())
    }

    fn session_finish(&self, session_id: &str, offset: u64, path: &str) -> Result<()> {
        let operation = format!("Finish upload session for '{}'", path);
        let arg = json!({
            "cursor": { "session_id": session_id, "offset": offset },
            "commit": { "path": path, "mode": "overwrite", "mute": true },
        });
        self.send(
            &operation,
            self.content("files/upload_session/finish", arg)
                .body(Vec::new()),
        )?;
        Ok(())
    }

    fn list_folder(&self, folder: &str) -> Result<DropboxListPage> {
        let operation = format!("List folder '{}'", folder);
        let response = self
            .client
            .post(format!("{}/files/list_folder", self.api_url))
            .bearer_auth(&self.access_token)
            .json(&json!({ "path": folder, "recursive": true }))
            .send()
            .map_err(|e| http::request_error(&operation, e))?;

        if response.status() == StatusCode::CONFLICT {
            let body = http::read_text(&operation, response)?;
            let summary = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error_summary)
                .unwrap_or_default();
            if summary.starts_with("path/not_found") {
                return Ok(DropboxListPage::default());
            }
            return Err(CloudError::transport(
                operation,
                format!("HTTP 409 Conflict: {}", http::excerpt(&body)),
            ));
        }

        let result: ListFolderResult = http::check_status(&operation, response)?
            .json()
            .map_err(|e| http::request_error(&operation, e))?;
        Ok(into_page(result))
    }

    fn list_folder_continue(&self, cursor: &str) -> Result<DropboxListPage> {
        let operation = "Continue folder listing";
        let result: ListFolderResult = self
            .rpc(operation, "files/list_folder/continue", json!({ "cursor": cursor }))?
            .json()
            .map_err(|e| http::request_error(operation, e))?;
        Ok(into_page(result))
    }

    fn delete_batch(&self, paths: &[String]) -> Result<DeleteBatchStatus> {
        let operation = format!("Delete batch of {} path(s)", paths.len());
        let entries: Vec<Value> = paths.iter().map(|p| json!({ "path": p })).collect();
        let response = self.rpc(&operation, "files/delete_batch", json!({ "entries": entries }))?;
        parse_delete_batch(&Self::json(&operation, response)?)
    }

    fn delete_batch_check(&self, job_id: &str) -> Result<DeleteBatchStatus> {
        let operation = "Check delete batch";
        let response = self.rpc(
            operation,
            "files/delete_batch/check",
            json!({ "async_job_id": job_id }),
        )?;
        match parse_delete_batch(&Self::json(operation, response)?)? {
            DeleteBatchStatus::InProgress(_) => Ok(DeleteBatchStatus::InProgress(job_id.to_string())),
            other => Ok(other),
        }
    }

    fn get_metadata(&self, path: &str) -> Result<ObjectMetadata> {
        let operation = format!("Get metadata '{}'", path);
        let value = Self::json(
            &operation,
            self.rpc(&operation, "files/get_metadata", json!({ "path": path }))?,
        )?;
        let raw: HashMap<String, String> = value
            .as_object()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(k, v)| match v {
                        Value::String(s) => Some((k.to_ascii_lowercase(), s.clone())),
                        Value::Number(n) => Some((k.to_ascii_lowercase(), n.to_string())),
                        Value::Bool(b) => Some((k.to_ascii_lowercase(), b.to_string())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ObjectMetadata {
            raw,
            ..Default::default()
        })
    }
}

/// In-memory Dropbox for tests
pub mod mock {
    use super::*;
    use crate::cloud::mock::{MockStore, StoredObject};
    use std::sync::{Arc, Mutex};

    /// Mock Dropbox account keyed by absolute path
    ///
    /// Checks `content_hash` on uploads and appends, enforces session offsets,
    /// returns listings in reverse key order (Dropbox makes no ordering promise)
    /// and completes delete jobs only after `polls_before_complete` checks.
    #[derive(Clone)]
    pub struct MockDropboxApi {
        pub store: MockStore,
        page_size: usize,
        polls_before_complete: u32,
        sessions: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        jobs: Arc<Mutex<HashMap<String, (u32, Vec<Option<String>>)>>>,
        cursors: Arc<Mutex<HashMap<String, Vec<DropboxEntry>>>>,
    }

    impl Default for MockDropboxApi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockDropboxApi {
        pub fn new() -> Self {
            Self {
                store: MockStore::new(),
                page_size: 500,
                polls_before_complete: 1,
                sessions: Arc::new(Mutex::new(HashMap::new())),
                jobs: Arc::new(Mutex::new(HashMap::new())),
                cursors: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        pub fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size.max(1);
            self
        }

        pub fn with_polls_before_complete(mut self, polls: u32) -> Self {
            self.polls_before_complete = polls;
            self
        }

        pub fn with_file(self, path: &str, data: &[u8]) -> Self {
            self.store.insert(
                path,
                StoredObject::new(data.to_vec(), digest::dropbox_content_hash(data)),
            );
            self
        }

        fn page_from(&self, mut remaining: Vec<DropboxEntry>) -> DropboxListPage {
            let rest = remaining.split_off(remaining.len().min(self.page_size));
            let has_more = !rest.is_empty();
            let mut cursors = self.cursors.lock().unwrap();
            let cursor = format!("cursor-{}", cursors.len() + 1);
            cursors.insert(cursor.clone(), rest);
            DropboxListPage {
                entries: remaining,
                cursor,
                has_more,
            }
        }
    }

    impl DropboxApi for MockDropboxApi {
        fn upload(&self, path: &str, source: &Path, _size: u64, content_hash: &str) -> Result<()> {
            self.store.call("upload", path)?;
            let data = std::fs::read(source).map_err(|e| CloudError::io(source, e))?;
            let actual = digest::dropbox_content_hash(&data);
            if actual != content_hash {
                return Err(CloudError::transport("upload", "HTTP 400 content_hash_mismatch"));
            }
            self.store.insert(path, StoredObject::new(data, actual));
            Ok(())
        }

        fn session_start(&self) -> Result<String> {
            self.store.call("session_start", "")?;
            let mut sessions = self.sessions.lock().unwrap();
            let id = format!("session-{}", sessions.len() + 1);
            sessions.insert(id.clone(), Vec::new());
            Ok(id)
        }

        fn session_append(
            &self,
            session_id: &str,
            offset: u64,
            data: &[u8],
            content_hash: &str,
        ) -> Result<()> {
            self.store.call("session_append", offset.to_string())?;
            if digest::dropbox_content_hash(data) != content_hash {
                return Err(CloudError::transport(
                    "session_append",
                    "HTTP 400 content_hash_mismatch",
                ));
            }
            let mut sessions = self.sessions.lock().unwrap();
            let buffer = sessions
                .get_mut(session_id)
                .ok_or_else(|| CloudError::transport("session_append", "HTTP 409 not_found"))?;
            if buffer.len() as u64 != offset {
                return Err(CloudError::transport(
                    "session_append",
                    "HTTP 409 incorrect_offset",
                ));
            }
            buffer.extend_from_slice(data);
            Ok(())
        }

        fn session_finish(&self, session_id: &str, offset: u64, path: &str) -> Result<()> {
            self.store.call("session_finish", path)?;
            let data = self
                .sessions
                .lock()
                .unwrap()
                .remove(session_id)
                .ok_or_else(|| CloudError::transport("session_finish", "HTTP 409 not_found"))?;
            if data.len() as u64 != offset {
                return Err(CloudError::transport(
                    "session_finish",
                    "HTTP 409 incorrect_offset",
                ));
            }
            let hash = digest::dropbox_content_hash(&data);
            self.store.insert(path, StoredObject::new(data, hash));
            Ok(())
        }

        fn list_folder(&self, folder: &str) -> Result<DropboxListPage> {
            self.store.call("list_folder", folder)?;
            let prefix = format!("{}/", folder.trim_end_matches('/'));
            let mut entries: Vec<DropboxEntry> = self
                .store
                .page(&prefix, None, usize::MAX)
                .into_iter()
                .map(|(path, object)| DropboxEntry {
                    path,
                    size: object.data.len() as u64,
                    content_hash: object.etag,
                })
                .collect();
            entries.reverse();
            Ok(self.page_from(entries))
        }

        fn list_folder_continue(&self, cursor: &str) -> Result<DropboxListPage> {
            self.store.call("list_folder_continue", cursor)?;
            let remaining = self
                .cursors
                .lock()
                .unwrap()
                .remove(cursor)
                .ok_or_else(|| CloudError::transport("list_folder_continue", "HTTP 409 reset"))?;
            Ok(self.page_from(remaining))
        }

        fn delete_batch(&self, paths: &[String]) -> Result<DeleteBatchStatus> {
            if paths.len() > 1_000 {
                return Err(CloudError::transport("delete_batch", "HTTP 400 too many entries"));
            }
            self.store.call("delete_batch", paths.len().to_string())?;

            let outcomes: Vec<Option<String>> = paths
                .iter()
                .map(|path| {
                    if let Some(reason) = self.store.take_item_failure(path) {
                        Some(reason)
                    } else if self.store.remove(path) {
                        None
                    } else {
                        Some("path_lookup/not_found".to_string())
                    }
                })
                .collect();

            let mut jobs = self.jobs.lock().unwrap();
            let job_id = format!("job-{}", jobs.len() + 1);
            jobs.insert(job_id.clone(), (self.polls_before_complete, outcomes));
            Ok(DeleteBatchStatus::InProgress(job_id))
        }

        fn delete_batch_check(&self, job_id: &str) -> Result<DeleteBatchStatus> {
            self.store.call("delete_batch_check", job_id)?;
            let mut jobs = self.jobs.lock().unwrap();
            let (remaining, outcomes) = jobs
                .get_mut(job_id)
                .ok_or_else(|| CloudError::transport("delete_batch_check", "HTTP 409 invalid_async_job_id"))?;
            if *remaining > 1 {
                *remaining -= 1;
                return Ok(DeleteBatchStatus::InProgress(job_id.to_string()));
            }
            Ok(DeleteBatchStatus::Complete(outcomes.clone()))
        }

        fn get_metadata(&self, path: &str) -> Result<ObjectMetadata> {
            self.store.call("get_metadata", path)?;
            let object = self
                .store
                .get(path)
                .ok_or_else(|| CloudError::transport("get_metadata", "HTTP 409 path/not_found"))?;
            let mut raw = HashMap::new();
            raw.insert("content_hash".to_string(), object.etag.clone());
            raw.insert("size".to_string(), object.data.len().to_string());
            Ok(ObjectMetadata {
                raw,
                ..Default::default()
            })
        }
    }
}
