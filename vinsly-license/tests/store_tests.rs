mod common;

use chrono::Duration;
use common::*;
use std::sync::Arc;
use tempfile::TempDir;
use vinsly_license::store::keys;
use vinsly_license::{FileStore, KeyValueStore, LicenseError, MemoryStore, PersistedState};

fn persisted_memory() -> (Arc<MemoryStore>, PersistedState) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), PersistedState::new(store))
}

// ── MemoryStore ──────────────────────────────────────────────────

#[tokio::test]
async fn memory_store_set_get_remove() {
    let store = MemoryStore::new();
    assert!(store.is_empty().await);

    store.set("a", "1").await.unwrap();
    store.set("a", "2").await.unwrap();
    assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
    assert_eq!(store.len().await, 1);

    store.remove("a").await.unwrap();
    store.remove("a").await.unwrap();
    assert_eq!(store.get("a").await.unwrap(), None);
}

// ── FileStore ────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("license.json");

    let store = FileStore::open(&path).await.unwrap();
    store.set(keys::LICENSE, "{\"x\":1}").await.unwrap();
    store.set(keys::GRACE_EXPIRES_AT, "later").await.unwrap();
    store.remove(keys::GRACE_EXPIRES_AT).await.unwrap();
    drop(store);

    let reopened = FileStore::open(&path).await.unwrap();
    assert_eq!(
        reopened.get(keys::LICENSE).await.unwrap().as_deref(),
        Some("{\"x\":1}")
    );
    assert_eq!(reopened.get(keys::GRACE_EXPIRES_AT).await.unwrap(), None);
    assert_eq!(reopened.path(), path.as_path());
}

#[tokio::test]
async fn file_store_missing_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("license.json");

    let store = FileStore::open(&path).await.unwrap();

    assert_eq!(store.get(keys::LICENSE).await.unwrap(), None);
    // Removing from an empty store does not create the file.
    store.remove(keys::LICENSE).await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn file_store_rejects_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("license.json");
    std::fs::write(&path, "not json at all").unwrap();

    let err = FileStore::open(&path).await.unwrap_err();
    assert!(matches!(err, LicenseError::Serialization(_)));
}

#[tokio::test]
async fn file_store_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("license.json");

    let store = FileStore::open(&path).await.unwrap();
    store.set(keys::LICENSE, "value").await.unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["license.json".to_string()]);
}

// ── PersistedState: record ───────────────────────────────────────

#[tokio::test]
async fn record_round_trips_through_store() {
    let (_, persisted) = persisted_memory();
    let record = stored_record(t0(), Some(t0() - Duration::hours(1)));

    persisted.save_record(&record).await.unwrap();

    assert_eq!(persisted.load_record().await.unwrap(), Some(record));
}

#[tokio::test]
async fn missing_record_loads_as_none() {
    let (_, persisted) = persisted_memory();
    assert_eq!(persisted.load_record().await.unwrap(), None);
}

#[tokio::test]
async fn record_without_instance_is_malformed() {
    let (store, persisted) = persisted_memory();
    store
        .set(
            keys::LICENSE,
            &format!(
                r#"{{"license_key":"{TEST_KEY}","last_checked":"2026-03-01T12:00:00Z"}}"#
            ),
        )
        .await
        .unwrap();

    let err = persisted.load_record().await.unwrap_err();
    assert!(matches!(err, LicenseError::MalformedRecord(_)));
}

// ── PersistedState: grace ────────────────────────────────────────

#[tokio::test]
async fn grace_expiry_only_moves_forward() {
    let (_, persisted) = persisted_memory();
    let first = t0() + Duration::days(7);

    assert_eq!(persisted.push_grace_expiry(first).await.unwrap(), first);
    assert_eq!(
        persisted
            .push_grace_expiry(first - Duration::days(2))
            .await
            .unwrap(),
        first
    );
    assert_eq!(persisted.grace_expiry().await.unwrap(), Some(first));

    let later = first + Duration::days(7);
    assert_eq!(persisted.push_grace_expiry(later).await.unwrap(), later);
    assert_eq!(persisted.grace_expiry().await.unwrap(), Some(later));
}

#[tokio::test]
async fn unparseable_grace_expiry_is_malformed_then_overwritten() {
    let (store, persisted) = persisted_memory();
    store.set(keys::GRACE_EXPIRES_AT, "next tuesday").await.unwrap();

    assert!(matches!(
        persisted.grace_expiry().await,
        Err(LicenseError::MalformedRecord(_))
    ));

    let expiry = t0() + Duration::days(7);
    assert_eq!(persisted.push_grace_expiry(expiry).await.unwrap(), expiry);
    assert_eq!(persisted.grace_expiry().await.unwrap(), Some(expiry));
}

#[tokio::test]
async fn clear_grace_removes_expiry() {
    let (store, persisted) = persisted_memory();
    persisted.push_grace_expiry(t0()).await.unwrap();

    persisted.clear_grace().await.unwrap();

    assert!(!store.contains(keys::GRACE_EXPIRES_AT).await);
}

// ── PersistedState: last validated ───────────────────────────────

#[tokio::test]
async fn last_validated_round_trips() {
    let (_, persisted) = persisted_memory();
    persisted.set_last_validated(t0()).await.unwrap();
    assert_eq!(persisted.last_validated().await.unwrap(), Some(t0()));
}

#[tokio::test]
async fn unparseable_last_validated_counts_as_none() {
    let (store, persisted) = persisted_memory();
    store.set(keys::LAST_VALIDATED_AT, "yesterday").await.unwrap();
    assert_eq!(persisted.last_validated().await.unwrap(), None);
}

#[tokio::test]
async fn clear_last_validated_removes_marker_only() {
    let (store, persisted) = persisted_memory();
    persisted.set_last_validated(t0()).await.unwrap();
    persisted.push_grace_expiry(t0()).await.unwrap();

    persisted.clear_last_validated().await.unwrap();

    assert_eq!(persisted.last_validated().await.unwrap(), None);
    assert!(store.contains(keys::GRACE_EXPIRES_AT).await);
}

// ── PersistedState: purge ────────────────────────────────────────

#[tokio::test]
async fn purge_removes_all_license_keys_only() {
    let (store, persisted) = persisted_memory();
    persisted
        .save_record(&stored_record(t0(), Some(t0())))
        .await
        .unwrap();
    persisted.push_grace_expiry(t0()).await.unwrap();
    persisted.set_last_validated(t0()).await.unwrap();
    store.set("vinsly:theme", "dark").await.unwrap();

    persisted.purge().await.unwrap();

    for key in keys::ALL {
        assert!(!store.contains(key).await, "{key} survived purge");
    }
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn purge_persists_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("license.json");
    let persisted = PersistedState::new(Arc::new(FileStore::open(&path).await.unwrap()));
    persisted
        .save_record(&stored_record(t0(), Some(t0())))
        .await
        .unwrap();

    persisted.purge().await.unwrap();

    let reopened = PersistedState::new(Arc::new(FileStore::open(&path).await.unwrap()));
    assert_eq!(reopened.load_record().await.unwrap(), None);
}
