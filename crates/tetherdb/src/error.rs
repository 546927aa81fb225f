//! Error types for tetherdb

use std::fmt;

/// Result type alias for connection and query operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for connection and query handling
#[derive(Debug)]
pub enum Error {
    /// One connection attempt against one server failed
    Connect {
        /// `host:port` of the server
        server: String,
        /// Driver-reported failure
        message: String,
    },

    /// Every configured server used up its attempts without producing a
    /// connection. This is the only fatal pool error.
    Exhausted {
        /// Total attempts made across all servers
        attempts: u32,
        /// Message from the last failure observed
        last: String,
    },

    /// A statement failed after a connection was established
    Query(String),

    /// An identifier handed to a query builder is not a plain name
    Identifier(String),

    /// Configuration rejected
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect { server, message } => {
                write!(f, "connection to {} failed: {}", server, message)
            }
            Error::Exhausted { attempts, last } => write!(
                f,
                "all database servers exhausted after {} attempts; last error: {}",
                attempts, last
            ),
            Error::Query(msg) => write!(f, "query failed: {}", msg),
            Error::Identifier(name) => write!(f, "invalid identifier: {:?}", name),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
