//! Key-value persistence for license state.
//!
//! The application injects a [`KeyValueStore`]; this crate ships an in-memory
//! store for tests and a JSON file store for the desktop app and CLI. The
//! typed view over the three license entries lives in [`PersistedState`].

use crate::error::{LicenseError, LicenseResult};
use crate::record::LicenseRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Storage keys.
pub mod keys {
    pub const LICENSE: &str = concat!("vinsly:", "license");
    pub const GRACE_EXPIRES_AT: &str = concat!("vinsly:", "license_grace_expires_at");
    pub const LAST_VALIDATED_AT: &str = concat!("vinsly:", "license_last_validated_at");

    /// Every entry owned by the license subsystem.
    pub const ALL: [&str; 3] = [LICENSE, GRACE_EXPIRES_AT, LAST_VALIDATED_AT];
}

/// Asynchronous string key-value store.
///
/// Implementations must make each individual `set`/`remove` durable before
/// returning; no cross-key atomicity is expected.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Gets a value by key.
    async fn get(&self, key: &str) -> LicenseResult<Option<String>>;

    /// Sets a value by key.
    async fn set(&self, key: &str, value: &str) -> LicenseResult<()>;

    /// Removes a value by key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> LicenseResult<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` is present.
    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> LicenseResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> LicenseResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> LicenseResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// File-backed store.
///
/// Keeps every entry in one JSON object at `path`. Each write rewrites the
/// file through a sibling temp file and a rename so a crash leaves either
/// the old or the new document.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Opens (or prepares to create) the store file at `path`.
    ///
    /// The parent directory is created if needed. An unreadable or corrupt
    /// file is an error rather than silently treated as empty.
    pub async fn open(path: impl AsRef<Path>) -> LicenseResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LicenseError::Storage(format!("create {}: {e}", parent.display())))?;
        }

        let cache = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(LicenseError::Storage(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };

        debug!("Opened license store at {}", path.display());
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> LicenseResult<()> {
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| LicenseError::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| LicenseError::Storage(format!("rename {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> LicenseResult<Option<String>> {
        Ok(self.cache.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> LicenseResult<()> {
        let mut cache = self.cache.lock().await;
        cache.insert(key.to_string(), value.to_string());
        self.persist(&cache).await
    }

    async fn remove(&self, key: &str) -> LicenseResult<()> {
        let mut cache = self.cache.lock().await;
        if cache.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&cache).await
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .finish()
    }
}

/// Typed access to the license record, grace expiry and last-validated marker.
#[derive(Clone)]
pub struct PersistedState {
    store: Arc<dyn KeyValueStore>,
}

impl PersistedState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Loads the license record.
    ///
    /// Returns `Ok(None)` when nothing is stored and
    /// [`LicenseError::MalformedRecord`] when the stored value fails
    /// validation.
    pub async fn load_record(&self) -> LicenseResult<Option<LicenseRecord>> {
        match self.store.get(keys::LICENSE).await? {
            None => Ok(None),
            Some(raw) => LicenseRecord::from_json(&raw).map(Some),
        }
    }

    pub async fn save_record(&self, record: &LicenseRecord) -> LicenseResult<()> {
        let raw = serde_json::to_string(record)?;
        self.store.set(keys::LICENSE, &raw).await
    }

    /// Reads the grace expiry.
    ///
    /// An unparseable value is reported as [`LicenseError::MalformedRecord`].
    pub async fn grace_expiry(&self) -> LicenseResult<Option<DateTime<Utc>>> {
        match self.store.get(keys::GRACE_EXPIRES_AT).await? {
            None => Ok(None),
            Some(raw) => parse_instant(&raw).map(Some).ok_or_else(|| {
                LicenseError::MalformedRecord(format!("unparseable grace expiry {raw:?}"))
            }),
        }
    }

    /// Stores `candidate` as the grace expiry unless a later one is already stored.
    ///
    /// Returns the expiry that is in effect afterwards.
    pub async fn push_grace_expiry(
        &self,
        candidate: DateTime<Utc>,
    ) -> LicenseResult<DateTime<Utc>> {
        let existing = match self.grace_expiry().await {
            Ok(existing) => existing,
            Err(LicenseError::MalformedRecord(reason)) => {
                warn!("Overwriting grace expiry: {reason}");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(existing) = existing
            && existing >= candidate
        {
            return Ok(existing);
        }

        self.store
            .set(keys::GRACE_EXPIRES_AT, &candidate.to_rfc3339())
            .await?;
        Ok(candidate)
    }

    pub async fn clear_grace(&self) -> LicenseResult<()> {
        self.store.remove(keys::GRACE_EXPIRES_AT).await
    }

    /// Reads the last successful validation instant.
    ///
    /// An unparseable value counts as no prior validation.
    pub async fn last_validated(&self) -> LicenseResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(keys::LAST_VALIDATED_AT).await? else {
            return Ok(None);
        };
        let parsed = parse_instant(&raw);
        if parsed.is_none() {
            warn!("Ignoring unparseable last-validated marker {raw:?}");
        }
        Ok(parsed)
    }

    pub async fn set_last_validated(&self, at: DateTime<Utc>) -> LicenseResult<()> {
        self.store
            .set(keys::LAST_VALIDATED_AT, &at.to_rfc3339())
            .await
    }

    pub async fn clear_last_validated(&self) -> LicenseResult<()> {
        self.store.remove(keys::LAST_VALIDATED_AT).await
    }

    /// Removes the record, the grace expiry and the last-validated marker.
    pub async fn purge(&self) -> LicenseResult<()> {
        for key in keys::ALL {
            self.store.remove(key).await?;
        }
        Ok(())
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
