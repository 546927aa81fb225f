//! Error types for tethercache

use std::fmt;
use std::io;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading or writing cache entries
///
/// Most of the public API deliberately swallows these: writes report plain
/// success or failure and reads treat every failure as a miss. The error
/// type surfaces only from [`FileCache::open`](crate::FileCache::open) and
/// the entry codec.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Entry bytes do not form a valid cache entry
    Corrupt(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Corrupt(msg) => write!(f, "Corrupt cache entry: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Corrupt(format!("{:?}", err))
    }
}
