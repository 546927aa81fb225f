//! # tetherdb
//!
//! Resilient PostgreSQL access for the payroll services: one kept-alive
//! connection with liveness and age checks, ordered failover across
//! configured servers, and a file-cache-backed read path.
//!
//! ## Architecture
//! - **Pool**: a single shared handle, pinged before every use and
//!   replaced when it ages out or goes dead
//! - **Failover**: servers are tried in order with bounded retries; a
//!   cached TCP probe skips hosts that are not even reachable
//! - **Connector seam**: [`Connector`] abstracts the wire client, so
//!   tests run against stubs and production runs on `postgres`
//! - **Cached reads**: [`CachedDatabase`] serves repeated queries from
//!   `tethercache` with caller-driven invalidation
//!
//! ## Example
//! ```no_run
//! use tetherdb::{ConnectionPool, PoolConfig, ServerDescriptor, Value};
//!
//! let config = PoolConfig::single(ServerDescriptor {
//!     host: "db1.internal".to_string(),
//!     port: 5432,
//!     dbname: "payroll".to_string(),
//!     user: "app".to_string(),
//!     password: "secret".to_string(),
//! });
//! let pool = ConnectionPool::new(config);
//! let rows = pool
//!     .connection()
//!     .unwrap()
//!     .query("SELECT id, name FROM employees WHERE id = $1", &[Value::Int(7)])
//!     .unwrap();
//! ```

#![warn(missing_docs)]

mod cached;
mod config;
mod connector;
mod error;
pub mod optimizer;
mod pg;
mod pool;
mod probe;

pub use cached::{query_cache_key, CachedDatabase};
pub use config::{PoolConfig, PoolSettings, ServerDescriptor};
pub use connector::{ConnectOptions, Connection, Connector, Liveness, Row, Value};
pub use error::{Error, Result};
pub use pg::PgConnector;
pub use pool::{ConnectionPool, PoolDiagnostics, PoolStats, PooledConnection, ServerProbe};
pub use probe::{ProbeCache, ProbeResult};
