//! GCS backend tests

use backup_sync::cloud::gcs::GcsBackend;
use backup_sync::cloud::{DeleteTarget, TransferBackend};
use backup_sync::utils::{digest, RetryPolicy};
use std::time::Duration;
use tempfile::TempDir;
use test_utils::{patterned_file, MockGcsApi, StoredObject};

fn backend(api: &MockGcsApi) -> GcsBackend {
    GcsBackend::new(Box::new(api.clone()), "bucket").with_retry(RetryPolicy::none())
}

#[test]
fn test_single_upload_lists_with_md5() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"contents").unwrap();
    let api = MockGcsApi::new();
    let backend = backend(&api);

    backend.upload(&path, "backups/a.txt").unwrap();

    let objects = backend.list("backups/").unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].content_hash(), digest::md5_hex(b"contents"));
    assert_eq!(objects[0].size(), 8);
}

#[test]
fn test_multipart_object_has_no_whole_file_hash() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.bin");
    let data = patterned_file(&path, 700);
    let api = MockGcsApi::new();
    let backend = backend(&api).with_chunk_bytes(256);

    backend.upload(&path, "big.bin").unwrap();

    assert_eq!(api.store.call_count("upload_part"), 3);
    assert_eq!(api.store.get("big.bin").unwrap().data, data);
    // A later sync cannot match this object by hash, so it is re-sent
    assert_eq!(backend.list("").unwrap()[0].content_hash(), "");
}

#[test]
fn test_list_follows_page_tokens() {
    let mut api = MockGcsApi::new().with_page_size(4);
    for i in 0..10 {
        api = api.with_object(&format!("p/{}", i), b"x");
    }

    let objects = backend(&api).list("p/").unwrap();

    assert_eq!(objects.len(), 10);
    let tokens: Vec<_> = api
        .store
        .calls_to("list_objects")
        .into_iter()
        .map(|c| c.detail)
        .collect();
    assert_eq!(tokens, vec!["", "token:p/3", "token:p/7"]);
}

#[test]
fn test_delete_batches_of_100() {
    let api = MockGcsApi::new();
    let targets: Vec<DeleteTarget> = (0..250)
        .map(|i| DeleteTarget::Key(format!("k/{:03}", i)))
        .collect();
    for target in &targets {
        api.store
            .insert(target.key(), StoredObject::new(vec![1], "etag"));
    }

    backend(&api).delete(&targets).unwrap();

    let sizes: Vec<_> = api
        .store
        .calls_to("batch_delete")
        .into_iter()
        .map(|c| c.detail)
        .collect();
    assert_eq!(sizes, vec!["100", "100", "50"]);
    assert!(api.store.keys().is_empty());
}

#[test]
fn test_batch_transport_failure_retries_whole_batch() {
    let api = MockGcsApi::new().with_object("a", b"1");
    api.store.fail_next("batch_delete", 1);

    backend(&api)
        .with_retry(RetryPolicy::new(1, Duration::ZERO))
        .delete(&[DeleteTarget::Key("a".into())])
        .unwrap();

    assert_eq!(api.store.call_count("batch_delete"), 2);
    assert!(!api.store.contains("a"));
}

#[test]
fn test_metadata_cached_on_descriptor() {
    let api = MockGcsApi::new().with_object("a", b"1");
    let backend = backend(&api);
    let object = backend.list("").unwrap().remove(0);

    object.metadata(&backend).unwrap();
    object.metadata(&backend).unwrap();

    assert_eq!(api.store.call_count("get_metadata"), 1);
}
