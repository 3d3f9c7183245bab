//! # Result Cache
//!
//! Stores the outputs of finished runs under their cache key so identical
//! requests skip execution.
//!
//! ## Backends
//!
//! | Backend | Lifetime | Bounds |
//! |---------------|-------------------|---------------------------------|
//! | `MemoryCache` | process           | total weight, entry age         |
//! | `DiskCache`   | survives restarts | entry age, total size (via [`DiskCache::gc`]) |
//!
//! ## Disk Layout
//!
//! Entries are stored one JSON document per key in a two-level directory
//! structure:
//!
//! ```text
//! ~/.simwps/cache/
//! ├── ab/
//! │   ├── abcd1234....json
//! │   └── ab9f8e7d....json
//! └── cd/
//!     └── cdef5678....json
//! ```
//!
//! The first two hex characters form a shard directory to prevent
//! filesystem performance degradation with many entries.
//!
//! ### Path Traversal Protection
//!
//! Keys are validated before constructing paths: exactly
//! [`CACHE_KEY_LEN`] lowercase hex characters.
//!
//! ### Atomic Writes
//!
//! Entries are written atomically via a temp file + rename pattern, so a
//! crash never leaves a half-written entry behind.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{
    CACHE_DIR, CACHE_KEY_LEN, DEFAULT_CACHE_MAX_BYTES, DEFAULT_CACHE_TTL, STATE_DIR,
};
use crate::data::OutputValues;
use crate::error::{Error, Result};

/// Outputs of one run, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    /// Identifier of the process that produced the outputs.
    pub process: String,
    /// When the run finished.
    pub created_at: DateTime<Utc>,
    /// Collected outputs by identifier.
    pub outputs: OutputValues,
}

impl CachedResult {
    pub fn new(process: impl Into<String>, outputs: OutputValues) -> Self {
        Self {
            process: process.into(),
            created_at: Utc::now(),
            outputs,
        }
    }

    /// Approximate size, used as cache weight.
    pub fn weight(&self) -> u64 {
        self.outputs
            .iter()
            .map(|(id, data)| id.len() as u64 + data.weight())
            .sum()
    }

    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.created_at + ttl < now,
            Err(_) => false,
        }
    }
}

/// Storage for run results keyed by cache key.
pub trait ResultCache: Send + Sync {
    /// Returns the result stored under the key, if any.
    fn get(&self, key: &str) -> Result<Option<CachedResult>>;

    /// Stores a result under the key, replacing any previous one.
    fn put(&self, key: &str, result: CachedResult) -> Result<()>;
}

// =============================================================================
// Memory
// =============================================================================

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    total_weight: u64,
    next_seq: u64,
}

struct MemoryEntry {
    result: CachedResult,
    weight: u64,
    seq: u64,
}

/// In-process cache bounded by total weight and entry age.
///
/// When the weight limit is exceeded the oldest entries are evicted first.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    max_weight: u64,
    ttl: Duration,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_BYTES, DEFAULT_CACHE_TTL)
    }
}

impl MemoryCache {
    pub fn new(max_weight: u64, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_weight,
            ttl,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total weight of stored entries.
    pub fn total_weight(&self) -> u64 {
        self.state.lock().map(|s| s.total_weight).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::StorageReadFailed("memory cache lock poisoned".to_string()))
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CachedResult>> {
        let mut state = self.lock()?;
        let expired = match state.entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.result.is_expired(self.ttl, Utc::now()),
        };
        if expired {
            if let Some(entry) = state.entries.remove(key) {
                state.total_weight -= entry.weight;
            }
            debug!(key, "memory cache entry expired");
            return Ok(None);
        }
        Ok(state.entries.get(key).map(|e| e.result.clone()))
    }

    fn put(&self, key: &str, result: CachedResult) -> Result<()> {
        let weight = result.weight();
        if weight > self.max_weight {
            warn!(key, weight, max = self.max_weight, "result too large for memory cache");
            return Ok(());
        }

        let mut state = self.lock()?;
        if let Some(old) = state.entries.remove(key) {
            state.total_weight -= old.weight;
        }

        while state.total_weight + weight > self.max_weight {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else { break };
            if let Some(evicted) = state.entries.remove(&oldest) {
                state.total_weight -= evicted.weight;
                debug!(key = %oldest, "evicted from memory cache");
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.total_weight += weight;
        state.entries.insert(
            key.to_string(),
            MemoryEntry {
                result,
                weight,
                seq,
            },
        );
        Ok(())
    }
}

// =============================================================================
// Disk
// =============================================================================

/// On-disk cache with one JSON document per key.
///
/// Entries older than the configured lifetime are treated as absent on read.
/// [`DiskCache::gc`] removes them and trims the oldest entries beyond the
/// size limit.
pub struct DiskCache {
    /// Base directory for cache entries.
    base_dir: PathBuf,
    ttl: Duration,
    max_bytes: u64,
}

impl DiskCache {
    /// Creates a cache at the default location.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// Creates a cache at the specified path.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).map_err(|e| Error::StorageInitFailed {
            path: base_dir.clone(),
            reason: e.to_string(),
        })?;

        info!("Result cache initialized at: {}", base_dir.display());

        Ok(Self {
            base_dir,
            ttl: DEFAULT_CACHE_TTL,
            max_bytes: DEFAULT_CACHE_MAX_BYTES,
        })
    }

    /// Sets the entry lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the size limit enforced by [`DiskCache::gc`].
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Returns the default storage path.
    pub fn default_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            home.join(STATE_DIR).join(CACHE_DIR)
        } else {
            PathBuf::from(STATE_DIR).join(CACHE_DIR)
        }
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the path of an entry.
    ///
    /// # Errors
    ///
    /// Rejects keys that are not [`CACHE_KEY_LEN`] lowercase hex characters.
    pub fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = key.len() == CACHE_KEY_LEN
            && key
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(Error::StorageReadFailed(format!("invalid cache key '{}'", key)));
        }
        Ok(self
            .base_dir
            .join(&key[..2])
            .join(format!("{}.json", key)))
    }

    /// Checks if an entry exists, expired or not.
    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).map(|p| p.exists()).unwrap_or(false)
    }

    /// Removes an entry.
    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        if path.exists() {
            fs::remove_file(&path).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Lists the keys of all stored entries.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        Self::walk_dir(&self.base_dir, &mut |path| {
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && let Some(key) = name.strip_suffix(".json")
                && key.len() == CACHE_KEY_LEN
            {
                keys.push(key.to_string());
            }
        })?;
        keys.sort();
        Ok(keys)
    }

    /// Returns the total size of all entries in bytes.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;
        Self::walk_dir(&self.base_dir, &mut |path| {
            if let Ok(meta) = fs::metadata(path)
                && meta.is_file()
            {
                total += meta.len();
            }
        })?;
        Ok(total)
    }

    /// Removes expired and unreadable entries, then the oldest entries until
    /// the total size fits the size limit.
    pub fn gc(&self) -> Result<GcStats> {
        let now = Utc::now();
        let mut removed = 0u64;
        let mut freed = 0u64;
        let mut live = Vec::new();

        for key in self.list_keys()? {
            let path = self.entry_path(&key)?;
            let Ok(meta) = fs::metadata(&path) else {
                continue;
            };
            let created_at = match Self::read_entry(&path) {
                Ok(result) if !result.is_expired(self.ttl, now) => Some(result.created_at),
                Ok(_) => None,
                Err(e) => {
                    warn!(key = %key, error = %e, "unreadable cache entry");
                    None
                }
            };
            match created_at {
                Some(created_at) => live.push((created_at, path, meta.len())),
                None => {
                    if fs::remove_file(&path).is_ok() {
                        freed += meta.len();
                        removed += 1;
                    }
                }
            }
        }

        let mut total: u64 = live.iter().map(|(_, _, size)| size).sum();
        live.sort_by_key(|(created_at, _, _)| *created_at);
        for (_, path, size) in live {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total -= size;
                freed += size;
                removed += 1;
            }
        }

        info!("GC: removed {} entries, freed {} bytes", removed, freed);
        Ok(GcStats {
            removed_count: removed,
            freed_bytes: freed,
        })
    }

    fn read_entry(path: &Path) -> Result<CachedResult> {
        let bytes = fs::read(path).map_err(|e| Error::StorageReadFailed(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::StorageReadFailed(e.to_string()))
    }

    /// Walks a directory recursively.
    fn walk_dir(dir: &Path, callback: &mut impl FnMut(&Path)) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(dir).map_err(|e| Error::StorageReadFailed(e.to_string()))? {
            let entry = entry.map_err(|e| Error::StorageReadFailed(e.to_string()))?;
            let path = entry.path();

            if path.is_dir() {
                Self::walk_dir(&path, callback)?;
            } else {
                callback(&path);
            }
        }

        Ok(())
    }
}

impl ResultCache for DiskCache {
    fn get(&self, key: &str) -> Result<Option<CachedResult>> {
        let path = self.entry_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let result = Self::read_entry(&path)?;
        if result.is_expired(self.ttl, Utc::now()) {
            debug!(key, "disk cache entry expired");
            return Ok(None);
        }
        Ok(Some(result))
    }

    fn put(&self, key: &str, result: CachedResult) -> Result<()> {
        let path = self.entry_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        }

        let data =
            serde_json::to_vec(&result).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;

        // Unique temp name per writer; the rename is atomic (last writer wins).
        let temp_name = format!("tmp.{}", uuid::Uuid::now_v7());
        let temp_path = path.with_extension(temp_name);
        fs::write(&temp_path, &data).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::StorageWriteFailed(e.to_string())
        })?;

        debug!("Stored result {} ({} bytes)", key, data.len());
        Ok(())
    }
}

/// Statistics from a garbage collection run.
///
/// Returned by [`DiskCache::gc`] to report cleanup results.
#[derive(Debug, Clone)]
pub struct GcStats {
    /// Number of entries removed.
    pub removed_count: u64,
    /// Bytes freed.
    pub freed_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use tempfile::TempDir;

    fn key(c: char) -> String {
        std::iter::repeat_n(c, CACHE_KEY_LEN).collect()
    }

    fn result(text: &str) -> CachedResult {
        let mut outputs = OutputValues::new();
        outputs.insert("out".to_string(), Data::String(text.to_string()));
        CachedResult::new("Echo", outputs)
    }

    #[test]
    fn test_disk_cache_roundtrip() {
        let temp = TempDir::new().unwrap();
        let cache = DiskCache::with_path(temp.path().to_path_buf()).unwrap();

        let k = key('a');
        assert!(cache.get(&k).unwrap().is_none());
        cache.put(&k, result("hello")).unwrap();
        assert!(cache.contains(&k));
        assert_eq!(cache.get(&k).unwrap().unwrap().outputs, result("hello").outputs);

        cache.remove(&k).unwrap();
        assert!(!cache.contains(&k));
    }

    #[test]
    fn test_disk_cache_sharded_path() {
        let temp = TempDir::new().unwrap();
        let cache = DiskCache::with_path(temp.path().to_path_buf()).unwrap();
        let k = format!("ab{}", "0".repeat(CACHE_KEY_LEN - 2));
        let path = cache.entry_path(&k).unwrap();
        assert_eq!(path, temp.path().join("ab").join(format!("{}.json", k)));
    }

    #[test]
    fn test_disk_cache_rejects_invalid_keys() {
        let temp = TempDir::new().unwrap();
        let cache = DiskCache::with_path(temp.path().to_path_buf()).unwrap();
        assert!(cache.entry_path("../../etc/passwd").is_err());
        assert!(cache.entry_path(&key('A')).is_err());
        assert!(cache.entry_path("abc").is_err());
    }

    #[test]
    fn test_memory_cache_evicts_oldest() {
        let one = result("x").weight();
        let cache = MemoryCache::new(one * 2, DEFAULT_CACHE_TTL);
        cache.put(&key('a'), result("x")).unwrap();
        cache.put(&key('b'), result("y")).unwrap();
        cache.put(&key('c'), result("z")).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key('a')).unwrap().is_none());
        assert!(cache.get(&key('c')).unwrap().is_some());
        assert_eq!(cache.total_weight(), one * 2);
    }

    #[test]
    fn test_memory_cache_expiry() {
        let cache = MemoryCache::new(DEFAULT_CACHE_MAX_BYTES, Duration::from_secs(60));
        let mut old = result("x");
        old.created_at = Utc::now() - chrono::Duration::seconds(120);
        cache.put(&key('a'), old).unwrap();
        assert!(cache.get(&key('a')).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disk_cache_gc_removes_expired() {
        let temp = TempDir::new().unwrap();
        let cache = DiskCache::with_path(temp.path().to_path_buf())
            .unwrap()
            .with_ttl(Duration::from_secs(60));
        let mut old = result("old");
        old.created_at = Utc::now() - chrono::Duration::seconds(120);
        cache.put(&key('a'), old).unwrap();
        cache.put(&key('b'), result("new")).unwrap();
        assert!(cache.get(&key('a')).unwrap().is_none());

        let stats = cache.gc().unwrap();
        assert_eq!(stats.removed_count, 1);
        assert_eq!(cache.list_keys().unwrap(), vec![key('b')]);
    }

    #[test]
    fn test_disk_cache_gc_enforces_size_limit() {
        let temp = TempDir::new().unwrap();
        let cache = DiskCache::with_path(temp.path().to_path_buf()).unwrap();
        let mut older = result("first");
        older.created_at = Utc::now() - chrono::Duration::seconds(10);
        cache.put(&key('a'), older).unwrap();
        cache.put(&key('b'), result("second")).unwrap();

        let limit = cache.total_size().unwrap() - 1;
        let cache = cache.with_max_bytes(limit);
        let stats = cache.gc().unwrap();
        assert_eq!(stats.removed_count, 1);
        assert!(!cache.contains(&key('a')));
        assert!(cache.contains(&key('b')));
    }
}
