//! XML documents of the S3 REST protocol
//!
//! The GCS XML API speaks the same multipart dialect, so its client reuses
//! these types.

use crate::cloud::{CloudError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub contents: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListEntry {
    pub key: String,
    #[serde(rename = "ETag", default)]
    pub etag: String,
    #[serde(default)]
    pub size: u64,
    pub storage_class: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateMultipartUploadResult {
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    pub parts: Vec<CompletedPartXml>,
}

#[derive(Debug, Serialize)]
pub struct CompletedPartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "Delete")]
pub struct DeleteRequest {
    #[serde(rename = "Quiet")]
    pub quiet: bool,
    #[serde(rename = "Object")]
    pub objects: Vec<ObjectIdentifier>,
}

#[derive(Debug, Serialize)]
pub struct ObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteResult {
    #[serde(rename = "Error", default)]
    pub errors: Vec<DeleteError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteError {
    pub key: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// `<Error>` document, returned on failures and sometimes inside a 200 response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorDocument {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorDocument {
    /// Parse `body` if it is an error document
    pub fn detect(body: &str) -> Option<Self> {
        let trimmed = body.trim_start();
        let root = trimmed
            .strip_prefix("<?xml")
            .and_then(|rest| rest.split_once("?>"))
            .map_or(trimmed, |(_, rest)| rest.trim_start());
        if !root.starts_with("<Error>") && !root.starts_with("<Error ") {
            return None;
        }
        quick_xml::de::from_str(root).ok()
    }
}

pub fn parse<T: for<'de> Deserialize<'de>>(provider: &'static str, body: &str) -> Result<T> {
    quick_xml::de::from_str(body)
        .map_err(|e| CloudError::invalid_response(provider, format!("malformed XML: {}", e)))
}

pub fn render<T: Serialize>(provider: &'static str, document: &T) -> Result<String> {
    quick_xml::se::to_string(document)
        .map_err(|e| CloudError::invalid_response(provider, format!("cannot encode XML: {}", e)))
}
