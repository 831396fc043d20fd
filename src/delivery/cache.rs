//! Persisted resolution outcome.
//!
//! One key per namespace (`<namespace>.delivery`), one envelope shape.
//! No TTL: a result lives until the user changes location or the entry is
//! found corrupt.
//! Schema v1: `{ "version": 1, "result": ResolutionResult }`. Any other
//! version reads as corrupt.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::ResolutionResult;

const SCHEMA_VERSION: u32 = 1;

/// Key-value store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Scoped string storage, the engine's only persistence dependency.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ─── In-memory store ────────────────────────────────────────────

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// ─── File store ─────────────────────────────────────────────────

/// JSON object on disk, rewritten on every change.
///
/// An unreadable or malformed file is treated as empty and overwritten on
/// the next write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `~/.varaha/store.json`.
    pub fn open_default() -> Self {
        Self::open(Self::default_path())
    }

    pub fn open(path: PathBuf) -> Self {
        let entries = Self::read_file(&path).unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".varaha")
            .join("store.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> Option<HashMap<String, String>> {
        let data = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "store file is malformed, starting empty");
                None
            }
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

// ─── Resolution cache ───────────────────────────────────────────

/// Cache read failures. Callers of [`ResolutionCache::load`] never see
/// these; they are logged and the read counts as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cached resolution is corrupt: {0}")]
    ReadCorrupt(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    result: ResolutionResult,
}

/// The shared, persisted outcome.
#[derive(Clone)]
pub struct ResolutionCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl ResolutionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
        Self {
            store,
            key: format!("{}.delivery", namespace),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Strict read: distinguishes a miss from a corrupt entry.
    pub fn read(&self) -> Result<Option<ResolutionResult>, CacheError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        let envelope: CacheEnvelope =
            serde_json::from_str(&raw).map_err(|e| CacheError::ReadCorrupt(e.to_string()))?;
        if envelope.version != SCHEMA_VERSION {
            return Err(CacheError::ReadCorrupt(format!(
                "schema version {} (expected {})",
                envelope.version, SCHEMA_VERSION
            )));
        }
        Ok(Some(envelope.result))
    }

    /// Lenient read used by the orchestrator. A corrupt entry is logged,
    /// removed, and reported as a miss.
    pub fn load(&self) -> Option<ResolutionResult> {
        match self.read() {
            Ok(hit) => hit,
            Err(CacheError::ReadCorrupt(reason)) => {
                warn!(key = %self.key, %reason, "discarding corrupt cached resolution");
                if let Err(e) = self.store.remove(&self.key) {
                    warn!(key = %self.key, error = %e, "could not remove corrupt entry");
                }
                None
            }
            Err(CacheError::Store(e)) => {
                warn!(key = %self.key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Persist a result. Failure is logged; the in-memory outcome stands.
    pub fn store(&self, result: &ResolutionResult) {
        let envelope = CacheEnvelope {
            version: SCHEMA_VERSION,
            result: result.clone(),
        };
        let written = serde_json::to_string(&envelope)
            .map_err(StoreError::from)
            .and_then(|json| self.store.set(&self.key, json));
        match written {
            Ok(()) => debug!(key = %self.key, zone = %result.zone.id, "resolution cached"),
            Err(e) => warn!(key = %self.key, error = %e, "could not persist resolution"),
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(key = %self.key, error = %e, "could not clear cached resolution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::resolver::PostalCodeResolver;
    use tempfile::TempDir;

    fn result() -> ResolutionResult {
        PostalCodeResolver::builtin().resolve_by_postal_code("302004").unwrap()
    }

    fn memory_cache() -> (ResolutionCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ResolutionCache::new(store.clone(), "varaha"), store)
    }

    #[test]
    fn test_put_get() {
        let (cache, _) = memory_cache();
        assert!(cache.load().is_none());

        let r = result();
        cache.store(&r);
        assert_eq!(cache.load(), Some(r));
    }

    #[test]
    fn test_single_key() {
        let (cache, store) = memory_cache();
        cache.store(&result());
        assert_eq!(cache.key(), "varaha.delivery");
        assert!(store.get("varaha.delivery").unwrap().is_some());
        assert_eq!(store.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_code_round_trip() {
        let (cache, _) = memory_cache();
        let r = PostalCodeResolver::builtin().resolve_by_postal_code("999999").unwrap();
        cache.store(&r);
        let back = cache.load().unwrap();
        assert_eq!(back.distance_km, None);
        assert!(back.zone.is_catch_all());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss_and_removed() {
        let (cache, store) = memory_cache();
        store.set(cache.key(), "{not json".into()).unwrap();

        assert!(matches!(cache.read(), Err(CacheError::ReadCorrupt(_))));
        assert!(cache.load().is_none());
        assert!(store.get(cache.key()).unwrap().is_none());
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let (cache, store) = memory_cache();
        store
            .set(cache.key(), r#"{"type":"express","pincode":"302001","eta":"2-3 hours"}"#.into())
            .unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_version_mismatch_is_corrupt() {
        let (cache, store) = memory_cache();
        cache.store(&result());
        let raw = store.get(cache.key()).unwrap().unwrap();
        let bumped = raw.replacen("\"version\":1", "\"version\":99", 1);
        store.set(cache.key(), bumped).unwrap();

        assert!(matches!(cache.read(), Err(CacheError::ReadCorrupt(msg)) if msg.contains("99")));
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_clear() {
        let (cache, _) = memory_cache();
        cache.store(&result());
        cache.clear();
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let a = ResolutionCache::new(store.clone(), "a");
        let b = ResolutionCache::new(store, "b");
        a.store(&result());
        assert!(b.load().is_none());
    }

    #[test]
    fn test_file_store_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let cache = ResolutionCache::new(Arc::new(FileStore::open(path.clone())), "varaha");
            cache.store(&result());
        }

        let cache = ResolutionCache::new(Arc::new(FileStore::open(path)), "varaha");
        assert_eq!(cache.load().unwrap().city.as_deref(), Some("Jaipur"));
    }

    #[test]
    fn test_file_store_malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "][").unwrap();

        let store = FileStore::open(path.clone());
        assert!(store.get("anything").unwrap().is_none());

        store.set("k", "v".into()).unwrap();
        let reopened = FileStore::open(path);
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_file_store_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(path.clone());
        store.set("k", "v".into()).unwrap();
        store.remove("k").unwrap();
        assert!(FileStore::open(path).get("k").unwrap().is_none());
    }
}
