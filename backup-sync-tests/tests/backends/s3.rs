//! S3 backend tests

use backup_sync::cloud::s3::S3Backend;
use backup_sync::cloud::{CloudError, DeleteTarget, RemoteObject, TransferBackend, UploadOptions};
use backup_sync::utils::{digest, RetryPolicy};
use std::time::Duration;
use tempfile::TempDir;
use test_utils::{patterned_file, sparse_file, MockS3Api};

fn backend(api: &MockS3Api) -> S3Backend {
    S3Backend::new(Box::new(api.clone()), "bucket").with_retry(RetryPolicy::none())
}

fn keys(count: usize) -> Vec<DeleteTarget> {
    (0..count)
        .map(|i| DeleteTarget::Key(format!("backups/{:05}", i)))
        .collect()
}

#[test]
fn test_multipart_upload_reassembles_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.tar");
    let data = patterned_file(&path, 1_000);
    let api = MockS3Api::new();

    backend(&api)
        .with_chunk_bytes(300)
        .upload(&path, "backups/archive.tar")
        .unwrap();

    assert_eq!(api.store.call_count("initiate_multipart"), 1);
    assert_eq!(api.store.call_count("upload_part"), 4);
    assert_eq!(api.store.call_count("complete_multipart"), 1);
    assert_eq!(api.store.call_count("put_object"), 0);

    let stored = api.store.get("backups/archive.tar").unwrap();
    assert_eq!(stored.data, data);
    assert!(stored.etag.ends_with("-4"));
    assert_eq!(api.open_uploads(), 0);
}

#[test]
fn test_failed_part_aborts_upload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.tar");
    patterned_file(&path, 1_000);
    let api = MockS3Api::new();
    api.store.fail_always("upload_part");

    let result = backend(&api)
        .with_chunk_bytes(300)
        .with_retry(RetryPolicy::new(2, Duration::ZERO))
        .upload(&path, "backups/archive.tar");

    assert!(matches!(result, Err(CloudError::RetriesExhausted { retries: 2, .. })));
    // First part: one attempt plus two retries
    assert_eq!(api.store.call_count("upload_part"), 3);
    assert_eq!(api.store.call_count("abort_multipart"), 1);
    assert_eq!(api.open_uploads(), 0);
    assert!(api.store.get("backups/archive.tar").is_none());
}

#[test]
fn test_transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"payload").unwrap();
    let api = MockS3Api::new();
    api.store.fail_next("put_object", 2);

    backend(&api)
        .with_retry(RetryPolicy::new(3, Duration::ZERO))
        .upload(&path, "a.txt")
        .unwrap();

    assert_eq!(api.store.call_count("put_object"), 3);
    assert_eq!(api.store.get("a.txt").unwrap().data, b"payload");
}

#[test]
fn test_upload_options_reach_the_object() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"payload").unwrap();
    let api = MockS3Api::new();

    backend(&api)
        .with_options(UploadOptions {
            storage_class: Some("STANDARD_IA".to_string()),
            encryption: Some("AES256".to_string()),
            days_to_keep: None,
        })
        .upload(&path, "a.txt")
        .unwrap();

    let listed = backend(&api).list("").unwrap();
    assert_eq!(listed[0].storage_class(), Some("STANDARD_IA"));
    assert_eq!(listed[0].content_hash(), digest::md5_hex(b"payload"));
}

#[test]
fn test_oversized_file_rejected_before_any_request() {
    let dir = TempDir::new().unwrap();
    let path = sparse_file(&dir.path().join("huge.img"), 6 * 1024 * 1024 * 1024);
    let api = MockS3Api::new();

    let err = backend(&api)
        .with_chunk_bytes(0)
        .upload(&path, "huge.img")
        .unwrap_err();

    assert!(err.is_file_too_large());
    assert!(api.store.calls().is_empty());
}

#[test]
fn test_list_pages_until_exhausted() {
    let mut api = MockS3Api::new().with_page_size(10);
    for i in 0..25 {
        api = api.with_object(&format!("backups/{:02}", i), b"x");
    }
    api = api.with_object("other/file", b"x");

    let objects = backend(&api).list("backups/").unwrap();

    assert_eq!(objects.len(), 25);
    assert_eq!(api.store.call_count("list_objects"), 3);
    assert!(objects.windows(2).all(|w| w[0].key() < w[1].key()));
}

#[test]
fn test_delete_splits_into_batches_of_1000() {
    let api = MockS3Api::new();
    let targets = keys(1_250);
    for target in &targets {
        api.store.insert(
            target.key(),
            test_utils::StoredObject::new(b"x".to_vec(), "etag"),
        );
    }

    backend(&api).delete(&targets).unwrap();

    let batches: Vec<_> = api
        .store
        .calls_to("delete_objects")
        .into_iter()
        .map(|c| c.detail)
        .collect();
    assert_eq!(batches, vec!["1000", "250"]);
    assert!(api.store.keys().is_empty());
}

#[test]
fn test_item_failure_surfaces_after_retries() {
    let api = MockS3Api::new().with_object("a", b"1").with_object("b", b"2");
    api.store.fail_item("b", "AccessDenied", u32::MAX);

    let err = backend(&api)
        .with_retry(RetryPolicy::new(1, Duration::ZERO))
        .delete(&[DeleteTarget::Key("a".into()), DeleteTarget::Key("b".into())])
        .unwrap_err();

    assert_eq!(api.store.call_count("delete_objects"), 2);
    let failures = err.item_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, "b");
    assert_eq!(failures[0].reason, "AccessDenied");
    assert!(!api.store.contains("a"));
}

#[test]
fn test_item_failure_that_clears_is_retried() {
    let api = MockS3Api::new().with_object("a", b"1");
    api.store.fail_item("a", "InternalError", 1);

    backend(&api)
        .with_retry(RetryPolicy::new(1, Duration::ZERO))
        .delete(&[DeleteTarget::Key("a".into())])
        .unwrap();

    assert!(api.store.keys().is_empty());
}

#[test]
fn test_metadata_is_fetched_once() {
    let api = MockS3Api::new().with_object("a", b"1");
    let backend = backend(&api);
    let object: RemoteObject = backend.list("").unwrap().remove(0);

    assert!(!object.has_cached_metadata());
    let first = object.metadata(&backend).unwrap().clone();
    let second = object.metadata(&backend).unwrap();

    assert_eq!(&first, second);
    assert!(object.has_cached_metadata());
    assert_eq!(api.store.call_count("head_object"), 1);
}
