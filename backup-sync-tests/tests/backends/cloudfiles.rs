//! CloudFiles (Swift) backend tests

use backup_sync::cloud::cloudfiles::api::SwiftApi;
use backup_sync::cloud::cloudfiles::CloudFilesBackend;
use backup_sync::cloud::{DeleteTarget, TransferBackend};
use backup_sync::sync::SyncEngine;
use backup_sync::utils::RetryPolicy;
use chrono::Utc;
use tempfile::TempDir;
use test_utils::{patterned_file, MockSwiftApi};

fn backend(api: &MockSwiftApi) -> CloudFilesBackend {
    CloudFilesBackend::new(Box::new(api.clone()), "backups").with_retry(RetryPolicy::none())
}

#[test]
fn test_first_upload_creates_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hello").unwrap();
    let api = MockSwiftApi::new();
    let backend = backend(&api);

    backend.upload(&path, "a.txt").unwrap();
    backend.upload(&path, "b.txt").unwrap();

    assert!(api.has_container("backups"));
    assert!(!api.has_container("backups_segments"));
    assert_eq!(api.store.call_count("ensure_container"), 1);
    assert_eq!(api.object("backups", "b.txt").unwrap().data, b"hello");
}

#[test]
fn test_first_sync_into_fresh_account() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
    std::fs::write(dir.path().join("b.txt"), b"beta").unwrap();
    let api = MockSwiftApi::new();
    let backend = backend(&api);

    let summary = SyncEngine::new(&backend)
        .sync_directory(dir.path(), "backups/docs")
        .unwrap();

    assert_eq!(summary.transferred, 2);
    assert!(api.has_container("backups"));
    assert_eq!(api.store.call_count("ensure_container"), 1);
    assert_eq!(api.object("backups", "backups/docs/b.txt").unwrap().data, b"beta");
}

#[test]
fn test_listing_unknown_container_is_refused_by_mock() {
    let api = MockSwiftApi::new();

    let result = api.list_objects("never-created", "", None, 10);

    assert!(result.is_err());
}

#[test]
fn test_segmented_upload_writes_manifest() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    let data = patterned_file(&path, 2_500);
    let api = MockSwiftApi::new();

    backend(&api)
        .with_segment_bytes(1_000)
        .upload(&path, "images/disk.img")
        .unwrap();

    assert_eq!(api.store.call_count("put_segment"), 3);
    assert_eq!(api.store.call_count("put_manifest"), 1);
    for index in 1..=3 {
        let segment = format!("images/disk.img/{:04}", index);
        assert!(api.object("backups_segments", &segment).is_some(), "{}", segment);
    }

    let manifest = api.object("backups", "images/disk.img").unwrap();
    assert_eq!(manifest.data, data);
    assert_eq!(
        manifest.headers.get("x-static-large-object").map(String::as_str),
        Some("True")
    );
}

#[test]
fn test_custom_segments_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    patterned_file(&path, 1_500);
    let api = MockSwiftApi::new();

    backend(&api)
        .with_segments_container("parts")
        .with_segment_bytes(1_000)
        .upload(&path, "disk.img")
        .unwrap();

    assert!(api.has_container("parts"));
    assert!(api.object("parts", "disk.img/0002").is_some());
}

#[test]
fn test_failed_manifest_removes_uploaded_segments() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    patterned_file(&path, 2_500);
    let api = MockSwiftApi::new();
    api.store.fail_always("put_manifest");

    let result = backend(&api)
        .with_segment_bytes(1_000)
        .upload(&path, "disk.img");

    assert!(result.is_err());
    assert_eq!(api.store.calls_to("bulk_delete")[0].detail, "3");
    assert!(api.object("backups_segments", "disk.img/0001").is_none());
    assert!(api.object("backups", "disk.img").is_none());
}

#[test]
fn test_days_to_keep_sets_delete_at() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    std::fs::write(&path, b"hello").unwrap();
    let api = MockSwiftApi::new();
    let backend = backend(&api).with_days_to_keep(Some(2));

    backend.upload(&path, "a.txt").unwrap();

    let object = backend.list("").unwrap().remove(0);
    let delete_at = object.metadata(&backend).unwrap().delete_at.unwrap();
    let days = (delete_at - Utc::now()).num_hours();
    assert!((47..=48).contains(&days), "delete_at {} hours away", days);
}

#[test]
fn test_list_stops_on_short_page() {
    let mut api = MockSwiftApi::new();
    for i in 0..7 {
        api = api.with_object("backups", &format!("d/{}", i), b"x");
    }

    let objects = backend(&api).with_list_limit(3).list("d/").unwrap();

    assert_eq!(objects.len(), 7);
    let markers: Vec<_> = api
        .store
        .calls_to("list_objects")
        .into_iter()
        .map(|c| c.detail)
        .collect();
    assert_eq!(markers, vec!["", "d/2", "d/5"]);
}

#[test]
fn test_deleting_manifest_removes_its_segments() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    patterned_file(&path, 2_500);
    let small = dir.path().join("small.txt");
    std::fs::write(&small, b"small").unwrap();
    let api = MockSwiftApi::new();
    let backend = backend(&api).with_segment_bytes(1_000);
    backend.upload(&path, "disk.img").unwrap();
    backend.upload(&small, "small.txt").unwrap();

    let targets: Vec<DeleteTarget> = backend
        .list("")
        .unwrap()
        .into_iter()
        .map(DeleteTarget::from)
        .collect();
    backend.delete(&targets).unwrap();

    assert_eq!(api.store.call_count("delete_manifest"), 1);
    assert_eq!(api.store.calls_to("bulk_delete")[0].detail, "1");
    assert!(api.store.keys().is_empty());
}

#[test]
fn test_bulk_delete_item_failure() {
    let api = MockSwiftApi::new().with_object("backups", "a", b"1");
    api.store.fail_item("backups/a", "409 Conflict", 1);

    let err = backend(&api)
        .delete(&[DeleteTarget::Key("a".into())])
        .unwrap_err();

    assert_eq!(err.item_failures()[0].key, "/backups/a");
    assert!(api.object("backups", "a").is_some());
}
