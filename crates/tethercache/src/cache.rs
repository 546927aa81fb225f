//! File-backed TTL cache
//!
//! ## Layout
//!
//! One directory per [`Category`] under a single cache root, one file per
//! key inside it. The root carries a `.htaccess` denying direct web access
//! for deployments that put the cache under a document root.
//!
//! ## Failure policy
//!
//! The cache is an optimization, never a source of truth. Writes report
//! success or failure and log the cause; reads treat expired, corrupt and
//! unreadable entries as misses and delete the backing file so the next
//! write starts clean.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::category::Category;
use crate::entry::{CacheEntry, ENTRY_EXTENSION};
use crate::error::{Error, Result};
use crate::keys;
use crate::stats::{CacheStats, CacheUsage, CategoryUsage};

/// Marker file denying direct web access to the cache root
const ACCESS_MARKER: &str = ".htaccess";

/// Contents of the access marker
const ACCESS_MARKER_BODY: &str = "Deny from all\n";

/// Distinguishes temp files written by concurrent threads of one process
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Cache construction settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory the cache lives in, created if missing
    pub root: PathBuf,
    /// Lifetime applied when `set` is called without an explicit TTL
    pub default_ttl_secs: u64,
    /// Whether the cache starts enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            root: PathBuf::from("cache"),
            default_ttl_secs: 3600,
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Default TTL as a `Duration`
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// File-backed TTL cache with category namespaces
pub struct FileCache {
    root: PathBuf,
    default_ttl: Duration,
    enabled: AtomicBool,
    stats: CacheStats,
}

impl FileCache {
    /// Open (and if necessary create) a cache rooted at `config.root`.
    ///
    /// Creates the root directory and writes the web-access marker once.
    /// Category subdirectories are created lazily on first write.
    pub fn open(config: CacheConfig) -> Result<FileCache> {
        fs::create_dir_all(&config.root)?;
        let marker = config.root.join(ACCESS_MARKER);
        if !marker.exists() {
            fs::write(&marker, ACCESS_MARKER_BODY)?;
        }
        Ok(FileCache {
            default_ttl: config.default_ttl(),
            enabled: AtomicBool::new(config.enabled),
            stats: CacheStats::new(),
            root: config.root,
        })
    }

    /// Directory the cache lives in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// TTL used when `set` receives `None`
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Hit/miss/write counters for this process
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Turn the whole cache on or off at runtime.
    ///
    /// While disabled every write reports failure and every read misses.
    /// Entries already on disk are left alone and become visible again once
    /// the cache is re-enabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether the cache currently accepts reads and writes
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Store `payload` under `key` in `category`.
    ///
    /// Returns `true` on success. Failures are logged and reported as
    /// `false`, never raised: a broken cache must not break the caller.
    pub fn set(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Option<Duration>,
        category: Category,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        match self.write_entry(key, payload, ttl, category) {
            Ok(()) => {
                self.stats.record_write();
                true
            }
            Err(e) => {
                warn!(key, category = %category, "cache write failed: {}", e);
                self.stats.record_write_error();
                false
            }
        }
    }

    fn write_entry(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Duration,
        category: Category,
    ) -> Result<()> {
        let dir = self.root.join(category.dir_name());
        fs::create_dir_all(&dir)?;
        let entry = CacheEntry::new(key, payload.to_vec(), unix_now(), ttl.as_secs());
        let file_name = keys::file_name_for_key(key);
        // Temp file plus rename keeps concurrent writers at last-write-wins
        // instead of interleaved bytes.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{}-{}.{}.tmp", process::id(), seq, file_name));
        let written = fs::write(&tmp, entry.encode())
            .and_then(|_| fs::rename(&tmp, dir.join(file_name)));
        if let Err(e) = written {
            // Whichever step failed, the temp file must not stay behind;
            // the sweeps only ever look at finished entries.
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Fetch the payload stored under `key` in `category`.
    ///
    /// Expired entries are deleted and reported as a miss; so are entries
    /// that fail to decode or that were written for a different key.
    pub fn get(&self, key: &str, category: Category) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            self.stats.record_miss();
            return None;
        }
        let path = self.entry_path(key, category);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.stats.record_miss();
                return None;
            }
            Err(e) => {
                warn!(key, path = %path.display(), "cache entry unreadable, discarding: {}", e);
                let _ = fs::remove_file(&path);
                self.stats.record_miss();
                return None;
            }
        };
        match CacheEntry::decode(&data) {
            Ok(entry) if entry.key != key => {
                warn!(key, path = %path.display(), "cache file belongs to a different key, discarding");
                let _ = fs::remove_file(&path);
                self.stats.record_miss();
                None
            }
            Ok(entry) => {
                if entry.is_expired(unix_now()) {
                    debug!(key, category = %category, "cache entry expired");
                    let _ = fs::remove_file(&path);
                    self.stats.record_miss();
                    None
                } else {
                    self.stats.record_hit();
                    Some(entry.payload)
                }
            }
            Err(e) => {
                warn!(key, path = %path.display(), "corrupt cache entry, discarding: {}", e);
                let _ = fs::remove_file(&path);
                self.stats.record_miss();
                None
            }
        }
    }

    /// Remove the entry for `key`, reporting whether a file was deleted
    pub fn delete(&self, key: &str, category: Category) -> bool {
        fs::remove_file(self.entry_path(key, category)).is_ok()
    }

    /// Delete entries in one category, or in every category when `None`.
    ///
    /// Only entry files are touched; the access marker and stray files
    /// survive. Returns the number of files removed.
    pub fn clear(&self, category: Option<Category>) -> u64 {
        match category {
            Some(cat) => self.clear_dir(&self.root.join(cat.dir_name())),
            None => Category::ALL
                .iter()
                .map(|cat| self.clear_dir(&self.root.join(cat.dir_name())))
                .sum(),
        }
    }

    fn clear_dir(&self, dir: &Path) -> u64 {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if is_entry_file(&path) && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Delete every expired or undecodable entry across all categories.
    ///
    /// Returns the number of files removed. Non-entry files are never
    /// touched.
    pub fn clean_expired(&self) -> u64 {
        let now = unix_now();
        let mut removed = 0;
        for cat in Category::ALL {
            let dir = self.root.join(cat.dir_name());
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_entry_file(&path) {
                    continue;
                }
                let stale = match fs::read(&path)
                    .map_err(Error::Io)
                    .and_then(|data| CacheEntry::decode(&data))
                {
                    Ok(decoded) => decoded.is_expired(now),
                    // Undecodable counts as stale.
                    Err(_) => true,
                };
                if stale && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "cache sweep finished");
        }
        removed
    }

    /// Entry counts and byte sizes per category
    pub fn usage(&self) -> CacheUsage {
        let mut categories = Vec::with_capacity(Category::ALL.len());
        for cat in Category::ALL {
            let dir = self.root.join(cat.dir_name());
            let mut entries = 0u64;
            let mut bytes = 0u64;
            if let Ok(dir_entries) = fs::read_dir(&dir) {
                for entry in dir_entries.flatten() {
                    let path = entry.path();
                    if !is_entry_file(&path) {
                        continue;
                    }
                    entries += 1;
                    if let Ok(meta) = entry.metadata() {
                        bytes += meta.len();
                    }
                }
            }
            categories.push(CategoryUsage {
                category: cat,
                entries,
                bytes,
            });
        }
        CacheUsage { categories }
    }

    /// Store any serializable value as JSON
    pub fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        category: Category,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes, ttl, category),
            Err(e) => {
                warn!(key, "cache value failed to serialize: {}", e);
                self.stats.record_write_error();
                false
            }
        }
    }

    /// Fetch and deserialize a JSON value.
    ///
    /// A payload that no longer deserializes is treated like a corrupt
    /// entry: deleted and reported as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str, category: Category) -> Option<T> {
        let payload = self.get(key, category)?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, "cached JSON failed to decode, discarding: {}", e);
                self.delete(key, category);
                None
            }
        }
    }

    /// Cache an API response for one endpoint and user
    pub fn cache_api_response<T: Serialize>(
        &self,
        endpoint: &str,
        user_id: u64,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.set_json(&keys::api_key(endpoint, user_id), value, ttl, Category::Api)
    }

    /// Fetch a previously cached API response
    pub fn cached_api_response<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        user_id: u64,
    ) -> Option<T> {
        self.get_json(&keys::api_key(endpoint, user_id), Category::Api)
    }

    /// Cache one section of per-user data
    pub fn cache_user_data<T: Serialize>(
        &self,
        user_id: u64,
        section: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.set_json(&keys::user_key(user_id, section), value, ttl, Category::Users)
    }

    /// Fetch one section of cached per-user data
    pub fn cached_user_data<T: DeserializeOwned>(&self, user_id: u64, section: &str) -> Option<T> {
        self.get_json(&keys::user_key(user_id, section), Category::Users)
    }

    /// Cache a rendered dashboard widget payload
    pub fn cache_dashboard_widget<T: Serialize>(
        &self,
        widget: &str,
        user_id: u64,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.set_json(
            &keys::widget_key(widget, user_id),
            value,
            ttl,
            Category::Dashboard,
        )
    }

    /// Fetch a cached dashboard widget payload
    pub fn cached_dashboard_widget<T: DeserializeOwned>(
        &self,
        widget: &str,
        user_id: u64,
    ) -> Option<T> {
        self.get_json(&keys::widget_key(widget, user_id), Category::Dashboard)
    }

    fn entry_path(&self, key: &str, category: Category) -> PathBuf {
        self.root
            .join(category.dir_name())
            .join(keys::file_name_for_key(key))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}
