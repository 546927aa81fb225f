//! On-disk cache entry format
//!
//! One file per entry:
//! ```text
//! TCE1
//! [version: u16] [flags: u16]
//! [created: u64] [expires: u64]
//! [key_len: u32] [key bytes]
//! [payload_len: u32] [payload bytes]
//! ```
//!
//! All integers are little-endian. `created` and `expires` are unix
//! timestamps in seconds. The originating key is stored inside the entry so
//! a reader can detect a file written for a different key.

use nom::{
    bytes::complete::{tag, take},
    number::complete::{le_u16, le_u32, le_u64},
    IResult,
};

use crate::error::{Error, Result};

/// Magic header for cache entry files
pub const ENTRY_MAGIC: &[u8] = b"TCE1";

/// Current entry format version
pub const ENTRY_VERSION: u16 = 1;

/// File extension used for cache entry files
pub const ENTRY_EXTENSION: &str = "tce";

/// A decoded cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Unix timestamp (seconds) when the entry was written
    pub created: u64,
    /// Unix timestamp (seconds) from which the entry must not be served
    pub expires: u64,
    /// The cache key the entry was written for
    pub key: String,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl CacheEntry {
    /// Build an entry stamped with the given creation time and lifetime
    pub fn new(key: &str, payload: Vec<u8>, created: u64, ttl_secs: u64) -> CacheEntry {
        CacheEntry {
            created,
            expires: created.saturating_add(ttl_secs),
            key: key.to_string(),
            payload,
        }
    }

    /// True when the entry must no longer be served at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires
    }

    /// Encode the entry into its on-disk representation
    pub fn encode(&self) -> Vec<u8> {
        let key = self.key.as_bytes();
        let mut buf =
            Vec::with_capacity(ENTRY_MAGIC.len() + 28 + key.len() + self.payload.len());
        buf.extend_from_slice(ENTRY_MAGIC);
        buf.extend_from_slice(&ENTRY_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags, reserved
        buf.extend_from_slice(&self.created.to_le_bytes());
        buf.extend_from_slice(&self.expires.to_le_bytes());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode an entry from its on-disk representation
    ///
    /// Any deviation (bad magic, unsupported version, truncation, trailing
    /// bytes, non-UTF-8 key) is reported as [`Error::Corrupt`].
    pub fn decode(data: &[u8]) -> Result<CacheEntry> {
        let (rest, raw) = parse_entry(data)?;
        if !rest.is_empty() {
            return Err(Error::Corrupt(format!("{} trailing bytes", rest.len())));
        }
        if raw.version != ENTRY_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported entry version {}",
                raw.version
            )));
        }
        let key = String::from_utf8(raw.key.to_vec())
            .map_err(|_| Error::Corrupt("key is not valid UTF-8".to_string()))?;
        Ok(CacheEntry {
            created: raw.created,
            expires: raw.expires,
            key,
            payload: raw.payload.to_vec(),
        })
    }
}

struct RawEntry<'a> {
    version: u16,
    created: u64,
    expires: u64,
    key: &'a [u8],
    payload: &'a [u8],
}

fn parse_entry(input: &[u8]) -> IResult<&[u8], RawEntry<'_>> {
    let (input, _) = tag(ENTRY_MAGIC)(input)?;
    let (input, version) = le_u16(input)?;
    let (input, _flags) = le_u16(input)?;
    let (input, created) = le_u64(input)?;
    let (input, expires) = le_u64(input)?;
    let (input, key_len) = le_u32(input)?;
    let (input, key) = take(key_len)(input)?;
    let (input, payload_len) = le_u32(input)?;
    let (input, payload) = take(payload_len)(input)?;
    Ok((
        input,
        RawEntry {
            version,
            created,
            expires,
            key,
            payload,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let entry = CacheEntry::new("report:42", b"payload bytes".to_vec(), 1_700_000_000, 300);
        let decoded = CacheEntry::decode(&entry.encode()).unwrap();

        assert_eq!(decoded, entry);
        assert_eq!(decoded.expires, 1_700_000_300);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let entry = CacheEntry::new("empty", Vec::new(), 100, 10);
        let decoded = CacheEntry::decode(&entry.encode()).unwrap();

        assert_eq!(decoded.payload, Vec::<u8>::new());
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new("k", vec![1], 100, 50);

        assert!(!entry.is_expired(149));
        assert!(entry.is_expired(150));
        assert!(entry.is_expired(151));
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut data = CacheEntry::new("k", vec![1, 2], 1, 1).encode();
        data[0] = b'X';

        assert!(matches!(CacheEntry::decode(&data), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_decode_truncated() {
        let data = CacheEntry::new("k", vec![1, 2, 3], 1, 1).encode();

        assert!(matches!(
            CacheEntry::decode(&data[..data.len() - 1]),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut data = CacheEntry::new("k", vec![1], 1, 1).encode();
        data.push(0);

        assert!(matches!(CacheEntry::decode(&data), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_decode_unsupported_version() {
        let mut data = CacheEntry::new("k", vec![1], 1, 1).encode();
        // Version lives right after the magic.
        data[ENTRY_MAGIC.len()] = 9;

        let err = CacheEntry::decode(&data).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_ttl_overflow_saturates() {
        let entry = CacheEntry::new("k", vec![], u64::MAX - 1, 100);
        assert_eq!(entry.expires, u64::MAX);
    }
}
