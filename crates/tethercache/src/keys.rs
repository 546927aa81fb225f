//! Deterministic cache key and file name derivation
//!
//! Cache keys are arbitrary strings. On disk they become a sanitized,
//! truncated prefix (operator readability) joined with a short SHA-256
//! suffix (collision resistance), so two distinct keys never share a file
//! name unless SHA-256 itself collides.

use sha2::{Digest, Sha256};

use crate::entry::ENTRY_EXTENSION;

/// Separator hashed between key parts
const PART_SEPARATOR: u8 = 0x1f;

/// Longest sanitized key prefix kept in a file name
const FILE_PREFIX_MAX: usize = 48;

/// Hex digits of the digest appended to every file name
const FILE_HASH_LEN: usize = 16;

/// Hash a list of key parts into one deterministic cache key.
///
/// Parts are joined with an ASCII unit separator before hashing, so
/// `["ab", "c"]` and `["a", "bc"]` produce different keys.
pub fn hashed_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([PART_SEPARATOR]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Key for a cached API response
pub fn api_key(endpoint: &str, user_id: u64) -> String {
    hashed_key(&["api", endpoint, &user_id.to_string()])
}

/// Key for one section of cached per-user data
pub fn user_key(user_id: u64, section: &str) -> String {
    hashed_key(&["user", &user_id.to_string(), section])
}

/// Key for a cached dashboard widget payload
pub fn widget_key(widget: &str, user_id: u64) -> String {
    hashed_key(&["widget", widget, &user_id.to_string()])
}

/// File name (with extension) a key is stored under.
///
/// Characters outside `[A-Za-z0-9_-]` are replaced with `_` and the prefix
/// is truncated, so the hash suffix is what actually distinguishes keys.
pub fn file_name_for_key(key: &str) -> String {
    let mut prefix = String::with_capacity(FILE_PREFIX_MAX);
    for c in key.chars() {
        if prefix.len() == FILE_PREFIX_MAX {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            prefix.push(c);
        } else {
            prefix.push('_');
        }
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    if prefix.is_empty() {
        format!("{}.{}", &digest[..FILE_HASH_LEN], ENTRY_EXTENSION)
    } else {
        format!("{}-{}.{}", prefix, &digest[..FILE_HASH_LEN], ENTRY_EXTENSION)
    }
}
