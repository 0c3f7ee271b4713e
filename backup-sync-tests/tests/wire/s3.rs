//! S3 REST client on the wire

use super::{header, Server};
use backup_sync::cloud::s3::api::{RealS3Api, S3Connection};
use backup_sync::cloud::s3::S3Backend;
use backup_sync::cloud::{CloudError, DeleteTarget, TransferBackend};
use backup_sync::utils::{digest, RetryPolicy};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn backend(server: &Server) -> S3Backend {
    let api = RealS3Api::new(&S3Connection {
        bucket: "bucket".to_string(),
        region: "us-east-1".to_string(),
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
        endpoint: Some(server.uri()),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    S3Backend::new(Box::new(api), "bucket").with_retry(RetryPolicy::none())
}

#[test]
fn test_put_sends_signed_request_with_content_md5() {
    let server = Server::start();
    server.mount(
        Mock::given(method("PUT"))
            .and(path("/bucket/backups/a%20b.txt"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"etag\"")),
    );
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a b.txt");
    std::fs::write(&file, b"hello world").unwrap();

    backend(&server).upload(&file, "backups/a b.txt").unwrap();

    let requests = server.received();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.body, b"hello world");
    assert_eq!(
        header(request, "content-md5"),
        Some(digest::md5_base64(b"hello world"))
    );
    assert!(header(request, "authorization")
        .unwrap()
        .starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
    assert!(header(request, "x-amz-date").is_some());
}

#[test]
fn test_list_follows_marker() {
    let server = Server::start();
    server.mount(
        Mock::given(method("GET"))
            .and(path("/bucket"))
            .and(query_param("marker", "backups/b"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>backups/c</Key><ETag>"ccc"</ETag><Size>3</Size></Contents>
</ListBucketResult>"#,
            )),
    );
    server.mount(
        Mock::given(method("GET"))
            .and(path("/bucket"))
            .and(query_param("prefix", "backups/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>backups/a</Key><ETag>"aaa"</ETag><Size>1</Size><StorageClass>STANDARD</StorageClass></Contents>
  <Contents><Key>backups/b</Key><ETag>"bbb"</ETag><Size>2</Size></Contents>
</ListBucketResult>"#,
            )),
    );

    let objects = backend(&server).list("backups/").unwrap();

    let keys: Vec<_> = objects.iter().map(|o| o.key()).collect();
    assert_eq!(keys, vec!["backups/a", "backups/b", "backups/c"]);
    assert_eq!(objects[0].content_hash(), "aaa");
    assert_eq!(objects[0].storage_class(), Some("STANDARD"));
    assert_eq!(objects[2].size(), 3);
    assert_eq!(server.received().len(), 2);
}

#[test]
fn test_batch_delete_reports_item_errors() {
    let server = Server::start();
    server.mount(
        Mock::given(method("POST"))
            .and(path("/bucket"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<DeleteResult>
  <Error><Key>b</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>
  <Error><Key>c</Key><Code>NoSuchKey</Code><Message>gone</Message></Error>
</DeleteResult>"#,
            )),
    );

    let err = backend(&server)
        .delete(&[
            DeleteTarget::Key("a".into()),
            DeleteTarget::Key("b".into()),
            DeleteTarget::Key("c".into()),
        ])
        .unwrap_err();

    let failures = err.item_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "b");
    assert!(failures[0].reason.starts_with("AccessDenied"));

    let request = &server.received()[0];
    assert_eq!(request.url.query(), Some("delete"));
    assert_eq!(
        header(request, "content-md5"),
        Some(digest::md5_base64(&request.body))
    );
    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains("<Quiet>true</Quiet>"));
    assert!(body.contains("<Object><Key>c</Key></Object>"));
}

#[test]
fn test_error_status_is_retried_then_reported() {
    let server = Server::start();
    server.mount(
        Mock::given(method("GET"))
            .and(path("/bucket"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<Error>SlowDown</Error>")),
    );

    let err = backend(&server)
        .with_retry(RetryPolicy::new(2, Duration::ZERO))
        .list("")
        .unwrap_err();

    assert!(matches!(err, CloudError::RetriesExhausted { retries: 2, .. }));
    assert!(err.to_string().contains("503"));
    assert_eq!(server.received().len(), 3);
}
