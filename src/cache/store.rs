//! Two-tier cache store for API responses
//!
//! Provides a `CacheStore` that keeps entries in an in-process index and mirrors
//! them to JSON files on disk, each with a creation timestamp checked against a
//! fixed TTL.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// File extension for cache entries
const CACHE_EXTENSION: &str = "cache";

/// Default time-to-live for cache entries
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Wrapper struct for cached data stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    /// The cached value
    value: Value,
    /// When the entry was written
    timestamp: DateTime<Utc>,
}

/// Aggregate view of cache usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    /// Total size of all cache files in bytes
    pub total_bytes: u64,
    /// Number of cache files on disk
    pub file_count: usize,
    /// Number of entries held in memory
    pub memory_entry_count: usize,
}

/// Expiring key-value cache backed by memory and disk
///
/// Files live in an XDG-compliant cache directory (`~/.cache/vworld/` on
/// Linux) unless a directory is given explicitly. The memory index only
/// mirrors what is on disk; disk is authoritative across restarts.
#[derive(Debug)]
pub struct CacheStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// How long an entry stays fresh
    ttl: Duration,
    /// Entries already loaded or written by this process
    memory: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheStore {
    /// Opens the store in the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new(ttl: Duration) -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "vworld")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf(), ttl))
    }

    /// Opens the store in a custom directory
    ///
    /// Creates the directory if needed and removes files that expired while
    /// the process was not running.
    pub fn with_dir(cache_dir: PathBuf, ttl: Duration) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(dir = %cache_dir.display(), error = %e, "failed to create cache directory");
        }

        let store = Self {
            cache_dir,
            ttl,
            memory: Mutex::new(HashMap::new()),
        };
        store.evict_expired();
        store
    }

    /// Directory holding the cache files
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reads a value, returning `None` on a miss, expiry or decoding failure
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        {
            let mut memory = self.memory();
            if let Some(entry) = memory.get(key) {
                if !self.is_expired(entry.timestamp) {
                    debug!(key, "memory cache hit");
                    return decode(key, entry.value.clone());
                }
                memory.remove(key);
            }
        }

        let path = self.cache_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "failed to read cache file");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "corrupt cache file");
                return None;
            }
        };

        if self.is_expired(entry.timestamp) {
            remove_file(&path);
            debug!(key, "cache entry expired");
            return None;
        }

        let value = decode(key, entry.value.clone())?;
        self.memory().insert(key.to_string(), entry);
        debug!(key, "file cache hit");
        Some(value)
    }

    /// Writes a value to both tiers, replacing any previous entry
    ///
    /// Disk failures are logged and otherwise ignored.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "value is not serializable; not cached");
                return;
            }
        };

        let entry = CacheEntry {
            value,
            timestamp: Utc::now(),
        };

        let path = self.cache_path(key);
        let written = fs::create_dir_all(&self.cache_dir)
            .and_then(|_| {
                serde_json::to_string_pretty(&entry)
                    .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))
            })
            .and_then(|json| fs::write(&path, json));

        self.memory().insert(key.to_string(), entry);

        match written {
            Ok(()) => debug!(key, "cache set"),
            Err(e) => warn!(key, path = %path.display(), error = %e, "failed to write cache file"),
        }
    }

    /// Removes a key from both tiers; missing keys are ignored
    pub fn delete(&self, key: &str) {
        self.memory().remove(key);
        let path = self.cache_path(key);
        if path.exists() {
            remove_file(&path);
            debug!(key, "cache deleted");
        }
    }

    /// Empties memory and removes every cache file in the directory
    pub fn clear(&self) {
        self.memory().clear();
        for path in self.cache_files() {
            remove_file(&path);
        }
        info!(dir = %self.cache_dir.display(), "cache cleared");
    }

    /// Removes cache files whose modification time is older than the TTL
    ///
    /// Runs once when the store is opened. Returns the number of files removed.
    pub fn evict_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        for path in self.cache_files() {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to stat cache file");
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.ttl && remove_file(&path) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, "evicted expired cache files");
        }
        removed
    }

    /// Returns disk usage and the number of in-memory entries
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            memory_entry_count: self.memory().len(),
            ..CacheStats::default()
        };

        for path in self.cache_files() {
            if let Ok(metadata) = fs::metadata(&path) {
                stats.total_bytes += metadata.len();
                stats.file_count += 1;
            }
        }
        stats
    }

    /// Returns the path to the cache file for the given key
    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", fingerprint(key), CACHE_EXTENSION))
    }

    /// Lists every `.cache` file in the cache directory
    fn cache_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %self.cache_dir.display(), error = %e, "failed to list cache directory");
                }
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == CACHE_EXTENSION))
            .collect()
    }

    fn is_expired(&self, timestamp: DateTime<Utc>) -> bool {
        // A timestamp in the future counts as fresh.
        (Utc::now() - timestamp)
            .to_std()
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Maps a cache key to a fixed-length, filesystem-safe name
///
/// First 128 bits of the key's SHA-256 digest as lowercase hex.
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..16])
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "cached value has an unexpected shape");
            None
        }
    }
}

fn remove_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove cache file");
            false
        }
    }
}
