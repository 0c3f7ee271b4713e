//! SyncEngine against a recording backend

use backup_sync::cloud::HashKind;
use backup_sync::sync::{ExcludeSet, SyncEngine, SyncError};
use std::time::Duration;
use test_utils::{sample_tree, RecordedCall, RecordingBackend, TestContext};

const BASE: &str = "backups/docs";

#[test]
fn test_first_sync_uploads_everything() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &sample_tree());
    let backend = RecordingBackend::new();

    let summary = SyncEngine::new(&backend)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.transferred, 4);
    assert_eq!(summary.unchanged, 0);
    assert_eq!(
        backend.keys(),
        vec![
            "backups/docs/docs/notes/todo.md",
            "backups/docs/docs/report.pdf",
            "backups/docs/photos/cat.jpg",
            "backups/docs/readme.txt",
        ]
    );
    assert_eq!(backend.calls()[0], RecordedCall::List("backups/docs/".to_string()));
    assert_eq!(backend.object("backups/docs/readme.txt").unwrap(), b"hello");
}

#[test]
fn test_second_sync_is_a_no_op() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &sample_tree());
    let backend = RecordingBackend::new();
    let engine = SyncEngine::new(&backend);

    engine.sync_directory(&root, BASE).unwrap();
    let summary = engine.sync_directory(&root, BASE).unwrap();

    assert_eq!(summary.transferred, 0);
    assert_eq!(summary.unchanged, 4);
    assert_eq!(backend.uploads().len(), 4);
}

#[test]
fn test_changed_file_is_resent() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("a.txt", "new"), ("b.txt", "same")]);
    let backend = RecordingBackend::new()
        .with_object("backups/docs/a.txt", b"old")
        .with_object("backups/docs/b.txt", b"same");

    let summary = SyncEngine::new(&backend)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.transferred, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(backend.uploads(), vec!["backups/docs/a.txt"]);
    assert_eq!(backend.object("backups/docs/a.txt").unwrap(), b"new");
}

#[test]
fn test_remote_only_files_are_orphaned_without_mirror() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("a.txt", "a")]);
    let backend = RecordingBackend::new()
        .with_object("backups/docs/a.txt", b"a")
        .with_object("backups/docs/stale.txt", b"stale")
        .with_object("backups/docs-old/x.txt", b"x");

    let summary = SyncEngine::new(&backend)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.orphaned, 1);
    assert_eq!(summary.deleted, 0);
    assert!(!summary.mirror);
    assert!(backend.deletes().is_empty());
    assert!(backend.object("backups/docs/stale.txt").is_some());
}

#[test]
fn test_mirror_deletes_in_one_call_after_transfers() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("keep.txt", "changed")]);
    let backend = RecordingBackend::new()
        .with_object("backups/docs/keep.txt", b"original")
        .with_object("backups/docs/old/1.txt", b"1")
        .with_object("backups/docs/old/2.txt", b"2")
        .with_object("backups/other/3.txt", b"3");

    let summary = SyncEngine::new(&backend)
        .with_mirror(true)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.transferred, 1);
    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.orphaned, 0);
    assert_eq!(
        backend.calls().last(),
        Some(&RecordedCall::Delete(vec![
            "backups/docs/old/1.txt".to_string(),
            "backups/docs/old/2.txt".to_string(),
        ]))
    );
    assert!(backend.object("backups/other/3.txt").is_some());
}

#[test]
fn test_oversized_file_is_skipped() {
    let ctx = TestContext::new();
    let root = ctx.create_tree(
        "docs",
        &[("small.txt", "tiny"), ("large.bin", "this one is far too large")],
    );
    let backend = RecordingBackend::new().with_size_limit(10);

    let summary = SyncEngine::new(&backend)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.transferred, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(backend.keys(), vec!["backups/docs/small.txt"]);
}

#[test]
fn test_transfer_failure_aborts_run() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);
    let backend = RecordingBackend::new().with_object("backups/docs/zombie.txt", b"z");
    backend.fail_uploads_of("backups/docs/b.txt");

    let result = SyncEngine::new(&backend)
        .with_mirror(true)
        .sync_directory(&root, BASE);

    match result {
        Err(SyncError::Aborted { path, source }) => {
            assert_eq!(path, "b.txt");
            assert!(source.to_string().contains("HTTP 500"));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    // Nothing is dispatched after the failure, and no deletes run
    assert_eq!(
        backend.uploads(),
        vec!["backups/docs/a.txt", "backups/docs/b.txt"]
    );
    assert!(backend.deletes().is_empty());
    assert!(backend.object("backups/docs/zombie.txt").is_some());
}

#[test]
fn test_mirror_delete_failure_aborts_run() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("a.txt", "a")]);
    let backend = RecordingBackend::new().with_object("backups/docs/stale.txt", b"stale");
    backend.fail_deletes();

    let result = SyncEngine::new(&backend)
        .with_mirror(true)
        .sync_directory(&root, BASE);

    match result {
        Err(SyncError::DeleteAborted { count, source }) => {
            assert_eq!(count, 1);
            assert_eq!(source.item_failures()[0].key, "backups/docs/stale.txt");
        }
        other => panic!("expected abort, got {:?}", other),
    }
    // Transfers ran before the delete, and the stale file survives
    assert_eq!(backend.uploads(), vec!["backups/docs/a.txt"]);
    assert!(backend.object("backups/docs/stale.txt").is_some());
}

#[test]
fn test_workers_transfer_concurrently() {
    let ctx = TestContext::new();
    let files: Vec<(String, String)> = (0..8)
        .map(|i| (format!("f{}.txt", i), format!("content {}", i)))
        .collect();
    let files: Vec<(&str, &str)> = files
        .iter()
        .map(|(p, c)| (p.as_str(), c.as_str()))
        .collect();
    let root = ctx.create_tree("docs", &files);
    let backend = RecordingBackend::new().with_upload_delay(Duration::from_millis(50));

    let summary = SyncEngine::new(&backend)
        .with_workers(4)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.transferred, 8);
    assert_eq!(backend.keys().len(), 8);
    let peak = backend.peak_concurrency();
    assert!((2..=4).contains(&peak), "peak concurrency was {}", peak);
}

#[test]
fn test_sequential_run_never_overlaps() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &sample_tree());
    let backend = RecordingBackend::new().with_upload_delay(Duration::from_millis(5));

    SyncEngine::new(&backend)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(backend.peak_concurrency(), 1);
}

#[test]
fn test_excluded_files_are_neither_sent_nor_deleted() {
    let ctx = TestContext::new();
    let root = ctx.create_tree(
        "docs",
        &[("a.txt", "a"), ("scratch.tmp", "t"), ("cache/blob", "b")],
    );
    let backend = RecordingBackend::new();
    let excludes = ExcludeSet::new(&["*.tmp", "cache/**"]).unwrap();

    let summary = SyncEngine::new(&backend)
        .with_excludes(excludes)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.transferred, 1);
    assert_eq!(backend.keys(), vec!["backups/docs/a.txt"]);
}

#[test]
fn test_provider_hash_kind_is_used_for_comparison() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("a.txt", "same bytes")]);
    let backend = RecordingBackend::new()
        .with_hash_kind(HashKind::DropboxContentHash)
        .with_object("backups/docs/a.txt", b"same bytes");

    let summary = SyncEngine::new(&backend)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.unchanged, 1);
    assert!(backend.uploads().is_empty());
}

#[test]
fn test_case_only_rename_is_not_deleted_on_case_insensitive_store() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("Photo.jpg", "pixels"), ("b.txt", "b")]);
    let backend = RecordingBackend::new()
        .with_case_insensitive_keys()
        .with_object("backups/docs/photo.jpg", b"pixels")
        .with_object("backups/docs/gone.txt", b"gone");

    let summary = SyncEngine::new(&backend)
        .with_mirror(true)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.deleted, 1);
    assert_eq!(
        backend.deletes(),
        vec![vec!["backups/docs/gone.txt".to_string()]]
    );
}

#[test]
fn test_case_differences_matter_on_case_sensitive_store() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("Photo.jpg", "pixels")]);
    let backend = RecordingBackend::new().with_object("backups/docs/photo.jpg", b"pixels");

    let summary = SyncEngine::new(&backend)
        .with_mirror(true)
        .sync_directory(&root, BASE)
        .unwrap();

    assert_eq!(summary.deleted, 1);
    assert_eq!(
        backend.deletes(),
        vec![vec!["backups/docs/photo.jpg".to_string()]]
    );
}

#[test]
fn test_empty_remote_base_lists_whole_namespace() {
    let ctx = TestContext::new();
    let root = ctx.create_tree("docs", &[("a.txt", "a")]);
    let backend = RecordingBackend::new();

    SyncEngine::new(&backend).sync_directory(&root, "").unwrap();

    assert_eq!(backend.calls()[0], RecordedCall::List(String::new()));
    assert_eq!(backend.keys(), vec!["a.txt"]);
}

#[test]
fn test_missing_local_directory_fails_before_upload() {
    let ctx = TestContext::new();
    let backend = RecordingBackend::new();

    let result = SyncEngine::new(&backend).sync_directory(&ctx.temp_dir().join("nope"), BASE);

    assert!(matches!(result, Err(SyncError::Scan { .. })));
    assert!(backend.uploads().is_empty());
}
