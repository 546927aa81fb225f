//! # tethercache
//!
//! File-backed TTL cache with per-category namespaces.
//!
//! ## Architecture
//! - **Layout**: one subdirectory per [`Category`], one file per key
//! - **Format**: versioned little-endian envelope, decoded with nom
//! - **Expiry**: checked on every read, expired files deleted eagerly
//! - **Failure policy**: writes report success/failure, reads degrade to
//!   misses; the cache never raises into the caller
//!
//! ## Example
//! ```no_run
//! use tethercache::{CacheConfig, Category, FileCache};
//!
//! let cache = FileCache::open(CacheConfig::default()).unwrap();
//! cache.set("greeting", b"hello", None, Category::General);
//! assert_eq!(
//!     cache.get("greeting", Category::General).as_deref(),
//!     Some(&b"hello"[..])
//! );
//! ```

#![warn(missing_docs)]

mod cache;
mod category;
mod entry;
mod error;
pub mod keys;
mod stats;

pub use cache::{CacheConfig, FileCache};
pub use category::{Category, UnknownCategory};
pub use entry::{CacheEntry, ENTRY_EXTENSION, ENTRY_MAGIC, ENTRY_VERSION};
pub use error::{Error, Result};
pub use stats::{CacheStats, CacheUsage, CategoryUsage};
