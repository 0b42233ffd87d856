// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rfm_core::instance::ReactiveMode;

fn storage(dir: &Path) -> MetricsStorage {
    MetricsStorage::new(dir.join("runner-fs"), dir.join("runner-fs-quarantine"), "unit-0")
}

fn instance(suffix: &str) -> InstanceId {
    InstanceId::new("unit-0", ReactiveMode::NonReactive, suffix)
}

#[test]
fn create_makes_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());

    let entry = storage.create(&instance("abc123")).unwrap();
    assert!(entry.path.is_dir());
    assert_eq!(entry.instance_id, instance("abc123"));
}

#[test]
fn create_fails_if_exists() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    storage.create(&instance("abc123")).unwrap();

    let err = storage.create(&instance("abc123")).unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)));
}

#[test]
fn get_missing_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let err = storage.get(&instance("nothere1")).unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[test]
fn list_all_skips_foreign_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    storage.create(&instance("abc123")).unwrap();
    storage.create(&instance("def456")).unwrap();
    std::fs::create_dir(tmp.path().join("runner-fs/other-prefix-xyz")).unwrap();

    let mut names: Vec<String> = storage
        .list_all()
        .unwrap()
        .into_iter()
        .map(|entry| entry.instance_id.name())
        .collect();
    names.sort();
    assert_eq!(names, vec!["unit-0-n-abc123", "unit-0-n-def456"]);
}

#[test]
fn list_all_on_missing_base_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    assert!(storage.list_all().unwrap().is_empty());
}

#[test]
fn delete_removes_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let entry = storage.create(&instance("abc123")).unwrap();
    std::fs::write(entry.path.join("pre-job-metrics.json"), "{}").unwrap();

    storage.delete(&instance("abc123")).unwrap();
    assert!(!entry.path.exists());
}

#[test]
fn quarantine_archives_then_deletes() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let entry = storage.create(&instance("abc123")).unwrap();
    std::fs::write(entry.path.join("pre-job-metrics.json"), "not json").unwrap();

    storage.move_to_quarantine(&instance("abc123")).unwrap();

    assert!(!entry.path.exists());
    let archive = tmp
        .path()
        .join("runner-fs-quarantine/unit-0-n-abc123.tar.gz");
    assert!(archive.is_file());
    assert!(std::fs::metadata(&archive).unwrap().len() > 0);
}

#[test]
fn quarantine_missing_storage_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = storage(tmp.path());
    let err = storage.move_to_quarantine(&instance("nothere1")).unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}
