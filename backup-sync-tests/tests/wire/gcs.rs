//! GCS client on the wire

use super::{header, Server};
use backup_sync::cloud::gcs::api::{GcsConnection, RealGcsApi};
use backup_sync::cloud::gcs::GcsBackend;
use backup_sync::cloud::{DeleteTarget, TransferBackend, UploadOptions};
use backup_sync::utils::{digest, RetryPolicy};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn backend(server: &Server) -> GcsBackend {
    let api = RealGcsApi::new(GcsConnection {
        bucket: "bucket".to_string(),
        access_token: "ya29.token".to_string(),
        endpoint: server.uri(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    GcsBackend::new(Box::new(api), "bucket").with_retry(RetryPolicy::none())
}

#[test]
fn test_upload_uses_xml_api_with_bearer_token() {
    let server = Server::start();
    server.mount(
        Mock::given(method("PUT"))
            .and(path("/bucket/backups/a.txt"))
            .respond_with(ResponseTemplate::new(200)),
    );
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, b"gcs body").unwrap();

    backend(&server)
        .with_options(UploadOptions {
            storage_class: Some("NEARLINE".to_string()),
            ..Default::default()
        })
        .upload(&file, "backups/a.txt")
        .unwrap();

    let request = &server.received()[0];
    assert_eq!(header(request, "authorization").as_deref(), Some("Bearer ya29.token"));
    assert_eq!(
        header(request, "content-md5"),
        Some(digest::md5_base64(b"gcs body"))
    );
    assert_eq!(header(request, "x-goog-storage-class").as_deref(), Some("NEARLINE"));
}

#[test]
fn test_list_decodes_md5_and_follows_tokens() {
    let server = Server::start();
    server.mount(
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o"))
            .and(query_param("pageToken", "next-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "name": "backups/b", "size": "2" }]
            }))),
    );
    server.mount(
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/bucket/o"))
            .and(query_param("prefix", "backups/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "name": "backups/a",
                    "md5Hash": digest::md5_base64(b"a"),
                    "size": "1",
                    "storageClass": "STANDARD"
                }],
                "nextPageToken": "next-1"
            }))),
    );

    let objects = backend(&server).list("backups/").unwrap();

    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].content_hash(), digest::md5_hex(b"a"));
    assert_eq!(objects[0].storage_class(), Some("STANDARD"));
    assert_eq!(objects[1].content_hash(), "");
    assert_eq!(objects[1].size(), 2);
}

#[test]
fn test_batch_delete_matches_parts_by_content_id() {
    let server = Server::start();
    let response_body = "--batch_resp\r\n\
        Content-Type: application/http\r\n\
        Content-ID: <response-2>\r\n\r\n\
        HTTP/1.1 404 Not Found\r\n\r\n\
        --batch_resp\r\n\
        Content-Type: application/http\r\n\
        Content-ID: <response-1>\r\n\r\n\
        HTTP/1.1 204 No Content\r\n\r\n\
        --batch_resp\r\n\
        Content-Type: application/http\r\n\
        Content-ID: <response-3>\r\n\r\n\
        HTTP/1.1 403 Forbidden\r\n\r\n\
        --batch_resp--\r\n";
    server.mount(
        Mock::given(method("POST"))
            .and(path("/batch/storage/v1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "multipart/mixed; boundary=batch_resp")
                    .set_body_string(response_body),
            ),
    );

    let err = backend(&server)
        .delete(&[
            DeleteTarget::Key("one".into()),
            DeleteTarget::Key("two".into()),
            DeleteTarget::Key("dir/three".into()),
        ])
        .unwrap_err();

    let failures = err.item_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "dir/three");
    assert_eq!(failures[0].reason, "403 Forbidden");

    let request = &server.received()[0];
    assert!(header(request, "content-type")
        .unwrap()
        .starts_with("multipart/mixed; boundary="));
    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains("DELETE /storage/v1/b/bucket/o/dir%2Fthree HTTP/1.1"));
}
