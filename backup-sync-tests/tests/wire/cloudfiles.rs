//! Cloud Files (Swift) client on the wire

use super::{header, Server};
use backup_sync::cloud::cloudfiles::api::{RealSwiftApi, SwiftConnection};
use backup_sync::cloud::cloudfiles::CloudFilesBackend;
use backup_sync::cloud::{DeleteTarget, RemoteObject, TransferBackend};
use backup_sync::utils::{digest, RetryPolicy};
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use test_utils::patterned_file;
use wiremock::matchers::{body_partial_json, header as header_eq, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn catalog(server: &Server, token: &str) -> Value {
    let uri = server.uri();
    json!({
        "access": {
            "token": { "id": token },
            "serviceCatalog": [
                {
                    "type": "compute",
                    "endpoints": [{ "region": "DFW", "publicURL": format!("{}/compute", uri) }]
                },
                {
                    "type": "object-store",
                    "name": "cloudFiles",
                    "endpoints": [
                        {
                            "region": "DFW",
                            "publicURL": format!("{}/v1/dfw", uri),
                            "internalURL": format!("{}/snet/dfw", uri)
                        },
                        {
                            "region": "ORD",
                            "publicURL": format!("{}/v1/ord", uri),
                            "internalURL": format!("{}/snet/ord", uri)
                        }
                    ]
                }
            ]
        }
    })
}

fn mount_auth(server: &Server) {
    server.mount(
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog(server, "token-1"))),
    );
}

fn connection(server: &Server) -> SwiftConnection {
    SwiftConnection {
        username: "user".to_string(),
        api_key: "key".to_string(),
        auth_url: server.uri(),
        region: None,
        servicenet: false,
        timeout: Duration::from_secs(5),
    }
}

fn backend_with(connection: SwiftConnection) -> CloudFilesBackend {
    CloudFilesBackend::new(Box::new(RealSwiftApi::new(connection).unwrap()), "backups")
        .with_retry(RetryPolicy::none())
}

fn backend(server: &Server) -> CloudFilesBackend {
    backend_with(connection(server))
}

/// Received requests other than authentication, as `METHOD path`
fn storage_requests(server: &Server) -> Vec<String> {
    server
        .received()
        .into_iter()
        .filter(|r| r.url.path() != "/v2.0/tokens")
        .map(|r| format!("{} {}", r.method, r.url.path()))
        .collect()
}

#[test]
fn test_authenticates_with_api_key_and_uses_catalog_endpoint() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .and(body_partial_json(json!({
                "auth": {
                    "RAX-KSKEY:apiKeyCredentials": { "username": "user", "apiKey": "key" }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog(&server, "token-1"))),
    );
    server.mount(
        Mock::given(method("PUT"))
            .and(path("/v1/dfw/backups"))
            .respond_with(ResponseTemplate::new(201)),
    );
    server.mount(
        Mock::given(method("GET"))
            .and(path("/v1/dfw/backups"))
            .respond_with(ResponseTemplate::new(204)),
    );

    let backend = backend(&server);
    backend.list("docs/").unwrap();
    backend.list("docs/").unwrap();

    // One authentication serves every request
    assert_eq!(server.received_at("/v2.0/tokens").len(), 1);
    let listing = &server.received_at("/v1/dfw/backups")[1];
    assert_eq!(header(listing, "x-auth-token").as_deref(), Some("token-1"));
}

#[test]
fn test_region_and_servicenet_select_internal_endpoint() {
    let server = Server::start();
    mount_auth(&server);
    server.mount(
        Mock::given(method("PUT"))
            .and(path("/snet/ord/backups"))
            .respond_with(ResponseTemplate::new(201)),
    );
    server.mount(
        Mock::given(method("GET"))
            .and(path("/snet/ord/backups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([]))),
    );

    let objects = backend_with(SwiftConnection {
        region: Some("ord".to_string()),
        servicenet: true,
        ..connection(&server)
    })
    .list("")
    .unwrap();

    assert!(objects.is_empty());
    assert_eq!(
        storage_requests(&server),
        vec!["PUT /snet/ord/backups", "GET /snet/ord/backups"]
    );
}

#[test]
fn test_unknown_region_is_reported() {
    let server = Server::start();
    mount_auth(&server);

    let err = backend_with(SwiftConnection {
        region: Some("SYD".to_string()),
        ..connection(&server)
    })
    .list("")
    .unwrap_err();

    assert!(err.to_string().contains("object-store endpoint"));
    assert!(storage_requests(&server).is_empty());
}

#[test]
fn test_fresh_container_is_created_before_listing() {
    let server = Server::start();
    mount_auth(&server);
    server.mount(
        Mock::given(method("PUT"))
            .and(path("/v1/dfw/backups"))
            .respond_with(ResponseTemplate::new(201)),
    );
    server.mount(
        Mock::given(method("GET"))
            .and(path("/v1/dfw/backups"))
            .and(query_param("prefix", "docs/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "docs/a", "hash": "aaa", "bytes": 1 }
            ]))),
    );

    let objects = backend(&server).list("docs/").unwrap();

    assert_eq!(objects[0].key(), "docs/a");
    assert_eq!(objects[0].content_hash(), "aaa");
    assert_eq!(
        storage_requests(&server),
        vec!["PUT /v1/dfw/backups", "GET /v1/dfw/backups"]
    );
}

#[test]
fn test_expired_token_is_renewed_on_retry() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog(&server, "token-1")))
            .up_to_n_times(1),
    );
    server.mount(
        Mock::given(method("POST"))
            .and(path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog(&server, "token-2"))),
    );
    server.mount(
        Mock::given(method("PUT"))
            .and(path("/v1/dfw/backups"))
            .and(header_eq("x-auth-token", "token-2"))
            .respond_with(ResponseTemplate::new(201)),
    );
    server.mount(
        Mock::given(method("PUT"))
            .and(path("/v1/dfw/backups"))
            .respond_with(ResponseTemplate::new(401)),
    );
    server.mount(
        Mock::given(method("GET"))
            .and(path("/v1/dfw/backups"))
            .respond_with(ResponseTemplate::new(204)),
    );

    backend(&server)
        .with_retry(RetryPolicy::new(1, Duration::ZERO))
        .list("")
        .unwrap();

    assert_eq!(server.received_at("/v2.0/tokens").len(), 2);
    let tokens: Vec<_> = server
        .received_at("/v1/dfw/backups")
        .iter()
        .map(|r| header(r, "x-auth-token").unwrap())
        .collect();
    assert_eq!(tokens, vec!["token-1", "token-2", "token-2"]);
}

#[test]
fn test_upload_sends_etag_and_delete_at() {
    let server = Server::start();
    mount_auth(&server);
    server.mount(Mock::given(method("PUT")).respond_with(ResponseTemplate::new(201)));
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a b.txt");
    std::fs::write(&file, b"swift body").unwrap();

    backend(&server)
        .with_days_to_keep(Some(2))
        .upload(&file, "docs/a b.txt")
        .unwrap();

    let request = &server.received_at("/v1/dfw/backups/docs/a%20b.txt")[0];
    assert_eq!(request.body, b"swift body");
    assert_eq!(header(request, "etag"), Some(digest::md5_hex(b"swift body")));
    let delete_at: i64 = header(request, "x-delete-at").unwrap().parse().unwrap();
    let expected = Utc::now().timestamp() + 2 * 86_400;
    assert!((delete_at - expected).abs() < 60, "x-delete-at {}", delete_at);
}

#[test]
fn test_segmented_upload_puts_manifest() {
    let server = Server::start();
    mount_auth(&server);
    server.mount(Mock::given(method("PUT")).respond_with(ResponseTemplate::new(201)));
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("disk.img");
    let data = patterned_file(&file, 2_500);

    backend(&server)
        .with_segment_bytes(1_000)
        .upload(&file, "disk.img")
        .unwrap();

    assert_eq!(
        storage_requests(&server),
        vec![
            "PUT /v1/dfw/backups",
            "PUT /v1/dfw/backups_segments",
            "PUT /v1/dfw/backups_segments/disk.img/0001",
            "PUT /v1/dfw/backups_segments/disk.img/0002",
            "PUT /v1/dfw/backups_segments/disk.img/0003",
            "PUT /v1/dfw/backups/disk.img",
        ]
    );

    let last = &server.received_at("/v1/dfw/backups_segments/disk.img/0003")[0];
    assert_eq!(last.body, &data[2_000..]);
    assert_eq!(header(last, "etag"), Some(digest::md5_hex(&data[2_000..])));

    let manifest = &server.received_at("/v1/dfw/backups/disk.img")[0];
    assert_eq!(manifest.url.query(), Some("multipart-manifest=put"));
    let segments: Value = serde_json::from_slice(&manifest.body).unwrap();
    assert_eq!(segments.as_array().unwrap().len(), 3);
    assert_eq!(segments[0]["path"], "/backups_segments/disk.img/0001");
    assert_eq!(segments[0]["etag"], digest::md5_hex(&data[..1_000]));
    assert_eq!(segments[2]["size_bytes"], 500);
}

#[test]
fn test_bulk_delete_body_and_errors() {
    let server = Server::start();
    mount_auth(&server);
    server.mount(
        Mock::given(method("POST"))
            .and(path("/v1/dfw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Number Deleted": 1,
                "Number Not Found": 0,
                "Response Status": "400 Bad Request",
                "Response Body": "",
                "Errors": [["/backups/c", "409 Conflict"]]
            }))),
    );

    let err = backend(&server)
        .delete(&[
            DeleteTarget::Key("docs/a b".into()),
            DeleteTarget::Key("c".into()),
        ])
        .unwrap_err();

    let failures = err.item_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "/backups/c");
    assert_eq!(failures[0].reason, "409 Conflict");

    let request = &server.received_at("/v1/dfw")[0];
    assert_eq!(request.url.query(), Some("bulk-delete"));
    assert_eq!(header(request, "content-type").as_deref(), Some("text/plain"));
    assert_eq!(
        String::from_utf8_lossy(&request.body),
        "/backups/docs/a%20b\n/backups/c"
    );
}

#[test]
fn test_bulk_delete_non_ok_status_without_errors_fails() {
    let server = Server::start();
    mount_auth(&server);
    server.mount(
        Mock::given(method("POST"))
            .and(path("/v1/dfw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Response Status": "502 Bad Gateway",
                "Errors": []
            }))),
    );

    let err = backend(&server)
        .delete(&[DeleteTarget::Key("a".into())])
        .unwrap_err();

    assert_eq!(err.item_failures()[0].reason, "502 Bad Gateway");
}

#[test]
fn test_manifest_delete_tolerates_missing_object() {
    let server = Server::start();
    mount_auth(&server);
    server.mount(
        Mock::given(method("HEAD"))
            .and(path("/v1/dfw/backups/disk.img"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("X-Static-Large-Object", "True"),
            ),
    );
    server.mount(
        Mock::given(method("DELETE"))
            .and(path("/v1/dfw/backups/disk.img"))
            .and(query_param("multipart-manifest", "delete"))
            .respond_with(ResponseTemplate::new(404)),
    );

    backend(&server)
        .delete(&[DeleteTarget::from(RemoteObject::new("disk.img", "etag"))])
        .unwrap();

    assert_eq!(
        storage_requests(&server),
        vec!["HEAD /v1/dfw/backups/disk.img", "DELETE /v1/dfw/backups/disk.img"]
    );
}
