//! Dropbox client on the wire

use super::{header, Server};
use backup_sync::cloud::dropbox::api::{DropboxConnection, RealDropboxApi};
use backup_sync::cloud::dropbox::DropboxBackend;
use backup_sync::cloud::{DeleteTarget, TransferBackend};
use backup_sync::utils::{digest, RetryPolicy};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn backend(server: &Server) -> DropboxBackend {
    let connection = DropboxConnection {
        api_url: server.uri(),
        content_url: server.uri(),
        ..DropboxConnection::new("token", Duration::from_secs(5))
    };
    DropboxBackend::new(Box::new(RealDropboxApi::new(&connection).unwrap()))
        .with_retry(RetryPolicy::none())
        .with_poll_interval(Duration::ZERO)
}

#[test]
fn test_upload_carries_content_hash_in_api_arg() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({}))),
    );
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a.txt");
    std::fs::write(&file, b"dropbox body").unwrap();

    backend(&server).upload(&file, "backups/a.txt").unwrap();

    let request = &server.received()[0];
    let arg: Value = serde_json::from_str(&header(request, "dropbox-api-arg").unwrap()).unwrap();
    assert_eq!(arg["path"], "/backups/a.txt");
    assert_eq!(arg["mode"], "overwrite");
    assert_eq!(
        arg["content_hash"],
        digest::dropbox_content_hash(b"dropbox body")
    );
    assert_eq!(header(request, "authorization").as_deref(), Some("Bearer token"));
    assert_eq!(request.body, b"dropbox body");
}

#[test]
fn test_missing_folder_lists_as_empty() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/list_folder"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error_summary": "path/not_found/..",
                "error": { ".tag": "path" }
            }))),
    );

    let objects = backend(&server).list("backups/docs/").unwrap();

    assert!(objects.is_empty());
    let request = &server.received()[0];
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["path"], "/backups/docs");
    assert_eq!(body["recursive"], true);
}

#[test]
fn test_list_skips_folders_and_continues() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/list_folder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    { ".tag": "folder", "path_display": "/backups" },
                    { ".tag": "file", "path_display": "/backups/b", "content_hash": "hb", "size": 2 }
                ],
                "cursor": "c1",
                "has_more": true
            }))),
    );
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/list_folder/continue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    { ".tag": "file", "path_display": "/backups/a", "content_hash": "ha", "size": 1 }
                ],
                "cursor": "c2",
                "has_more": false
            }))),
    );

    let objects = backend(&server).list("backups/").unwrap();

    let keys: Vec<_> = objects.iter().map(|o| o.key()).collect();
    assert_eq!(keys, vec!["backups/a", "backups/b"]);
    assert_eq!(objects[0].content_hash(), "ha");
}

#[test]
fn test_delete_batch_polls_job() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/delete_batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                ".tag": "async_job_id",
                "async_job_id": "job-42"
            }))),
    );
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/delete_batch/check"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ ".tag": "in_progress" })),
            )
            .up_to_n_times(2),
    );
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/delete_batch/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                ".tag": "complete",
                "entries": [
                    { ".tag": "success", "metadata": {} },
                    {
                        ".tag": "failure",
                        "failure": {
                            ".tag": "path_lookup",
                            "path_lookup": { ".tag": "not_found" }
                        }
                    }
                ]
            }))),
    );

    backend(&server)
        .delete(&[
            DeleteTarget::Key("backups/a".into()),
            DeleteTarget::Key("backups/gone".into()),
        ])
        .unwrap();

    let checks = server.received_at("/files/delete_batch/check");
    assert_eq!(checks.len(), 3);
    let body: Value = serde_json::from_slice(&checks[2].body).unwrap();
    assert_eq!(body["async_job_id"], "job-42");

    let batch: Value =
        serde_json::from_slice(&server.received_at("/files/delete_batch")[0].body).unwrap();
    assert_eq!(batch["entries"][1]["path"], "/backups/gone");
}

#[test]
fn test_delete_batch_failure_entry_is_reported() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/files/delete_batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                ".tag": "complete",
                "entries": [{
                    ".tag": "failure",
                    "failure": { ".tag": "too_many_write_operations" }
                }]
            }))),
    );

    let err = backend(&server)
        .delete(&[DeleteTarget::Key("backups/a".into())])
        .unwrap_err();

    let failures = err.item_failures();
    assert_eq!(failures[0].key, "backups/a");
    assert_eq!(failures[0].reason, "too_many_write_operations");
}
