//! Hit/miss accounting and on-disk usage reporting

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::category::Category;

/// Process-local cache counters
///
/// Counters use relaxed ordering; they are statistics, not synchronization.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_errors: AtomicU64,
}

impl CacheStats {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads served from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Reads that missed (absent, expired, corrupt or cache disabled)
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Writes that reached disk
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Writes that failed
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Fraction of reads served from the cache (0.0 when unused)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.write_errors.store(0, Ordering::Relaxed);
    }
}

/// Entry count and byte size for one category
#[derive(Debug, Clone, Serialize)]
pub struct CategoryUsage {
    /// Category these figures describe
    pub category: Category,
    /// Entry files currently on disk
    pub entries: u64,
    /// Total size of those files in bytes
    pub bytes: u64,
}

/// On-disk usage across all categories
#[derive(Debug, Clone, Serialize)]
pub struct CacheUsage {
    /// Per-category breakdown, in [`Category::ALL`] order
    pub categories: Vec<CategoryUsage>,
}

impl CacheUsage {
    /// Total entry files across all categories
    pub fn total_entries(&self) -> u64 {
        self.categories.iter().map(|c| c.entries).sum()
    }

    /// Total bytes across all categories
    pub fn total_bytes(&self) -> u64 {
        self.categories.iter().map(|c| c.bytes).sum()
    }
}
