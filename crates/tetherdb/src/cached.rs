//! Read-through query caching over the connection pool
//!
//! [`CachedDatabase`] pairs a [`ConnectionPool`] with a
//! [`FileCache`] and serves repeated reads from disk instead of the
//! server. Invalidation is caller-driven: writers call
//! [`CachedDatabase::invalidate_query`] (or flush the whole query
//! category) after mutating the tables a query reads.
//!
//! Cache failures never fail a query. A broken cache degrades to
//! running every statement against the pool.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use tethercache::{keys, Category, FileCache};

use crate::connector::{Row, Value};
use crate::error::Result;
use crate::optimizer::{Aggregate, PagedListing, PrefixSearch};
use crate::pool::ConnectionPool;

/// Cache key for a parameterized statement.
///
/// The key hashes the SQL text together with every parameter in its
/// canonical rendering, so the same statement with different parameters
/// occupies different slots and `Int(1)` never collides with
/// `Text("1")`.
pub fn query_cache_key(sql: &str, params: &[Value]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(params.len() + 1);
    parts.push(sql.to_string());
    parts.extend(params.iter().map(Value::canonical));
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    keys::hashed_key(&refs)
}

/// Connection pool plus file cache behind one query API
pub struct CachedDatabase {
    pool: Arc<ConnectionPool>,
    cache: Arc<FileCache>,
}

impl CachedDatabase {
    /// Wrap a pool and a cache
    pub fn new(pool: Arc<ConnectionPool>, cache: Arc<FileCache>) -> Self {
        CachedDatabase { pool, cache }
    }

    /// The underlying pool
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The underlying cache
    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    /// Run a read query through the cache.
    ///
    /// A fresh cached result is returned without touching the pool.
    /// On a miss the statement runs against the live connection and the
    /// rows are stored under `ttl` (cache default when `None`). Storing
    /// is best effort; the rows are returned either way.
    pub fn cached_query(
        &self,
        sql: &str,
        params: &[Value],
        ttl: Option<Duration>,
    ) -> Result<Vec<Row>> {
        let key = query_cache_key(sql, params);
        if let Some(rows) = self.cache.get_json::<Vec<Row>>(&key, Category::Queries) {
            debug!(key = %key, rows = rows.len(), "query served from cache");
            return Ok(rows);
        }
        let rows = self.pool.connection()?.query(sql, params)?;
        self.cache.set_json(&key, &rows, ttl, Category::Queries);
        Ok(rows)
    }

    /// Run a read query directly against the pool, skipping the cache
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.pool.connection()?.query(sql, params)
    }

    /// Run a statement that mutates data.
    ///
    /// Never cached. Callers are expected to invalidate the queries the
    /// statement made stale.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.pool.connection()?.execute(sql, params)
    }

    /// Drop the cached result of one statement, if present
    pub fn invalidate_query(&self, sql: &str, params: &[Value]) -> bool {
        self.cache
            .delete(&query_cache_key(sql, params), Category::Queries)
    }

    /// Drop every cached entry in `category`, returning how many were removed.
    ///
    /// `Category::Queries` flushes all cached query results; the other
    /// categories cover what the shared cache holds for its own wrappers.
    pub fn invalidate_category(&self, category: Category) -> u64 {
        self.cache.clear(Some(category))
    }

    /// Build and run a paged listing through the cache
    pub fn cached_listing(
        &self,
        listing: &PagedListing,
        ttl: Option<Duration>,
    ) -> Result<Vec<Row>> {
        let (sql, params) = listing.build()?;
        self.cached_query(&sql, &params, ttl)
    }

    /// Build and run a prefix search through the cache
    pub fn cached_search(&self, search: &PrefixSearch, ttl: Option<Duration>) -> Result<Vec<Row>> {
        let (sql, params) = search.build()?;
        self.cached_query(&sql, &params, ttl)
    }

    /// Build and run an aggregate through the cache
    pub fn cached_aggregate(
        &self,
        aggregate: &Aggregate,
        ttl: Option<Duration>,
    ) -> Result<Vec<Row>> {
        let (sql, params) = aggregate.build()?;
        self.cached_query(&sql, &params, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, PoolSettings, ServerDescriptor};
    use crate::connector::{ConnectOptions, Connection, Connector, Liveness};
    use crate::optimizer::AggregateFn;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread::sleep;
    use tempfile::TempDir;
    use tethercache::CacheConfig;

    struct CannedConnection {
        rows: Vec<Row>,
        statements: Arc<AtomicU32>,
    }

    impl Connection for CannedConnection {
        fn ping(&mut self) -> Liveness {
            Liveness::Alive
        }

        fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            self.statements.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.clone())
        }
    }

    struct CannedConnector {
        rows: Vec<Row>,
        statements: Arc<AtomicU32>,
    }

    impl Connector for CannedConnector {
        fn connect(
            &self,
            _server: &ServerDescriptor,
            _options: &ConnectOptions,
        ) -> Result<Box<dyn Connection>> {
            Ok(Box::new(CannedConnection {
                rows: self.rows.clone(),
                statements: self.statements.clone(),
            }))
        }
    }

    fn sample_rows() -> Vec<Row> {
        vec![Row {
            columns: vec![
                "id".to_string(),
                "name".to_string(),
                "salary".to_string(),
                "active".to_string(),
                "badge".to_string(),
                "note".to_string(),
            ],
            values: vec![
                Value::Int(7),
                Value::Text("Mina".to_string()),
                Value::Float(4200.5),
                Value::Bool(true),
                Value::Bytes(vec![0xca, 0xfe]),
                Value::Null,
            ],
        }]
    }

    struct Harness {
        db: CachedDatabase,
        statements: Arc<AtomicU32>,
        // Dropping either of these tears the fixture down under the test.
        _tmp: TempDir,
        _listener: TcpListener,
    }

    fn harness(rows: Vec<Row>, cache_enabled: bool) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let statements = Arc::new(AtomicU32::new(0));
        let connector = CannedConnector {
            rows,
            statements: statements.clone(),
        };
        let config = PoolConfig {
            primary: ServerDescriptor {
                host: "127.0.0.1".to_string(),
                port,
                dbname: "payroll".to_string(),
                user: "app".to_string(),
                password: String::new(),
            },
            fallbacks: Vec::new(),
            settings: PoolSettings {
                retry_attempts: 2,
                retry_delay_ms: 30,
                connect_timeout_secs: 1,
                probe_timeout_secs: 1,
                ..PoolSettings::default()
            },
        };
        let pool = Arc::new(ConnectionPool::with_connector(config, Box::new(connector)));

        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(
            FileCache::open(CacheConfig {
                root: tmp.path().join("cache"),
                default_ttl_secs: 3600,
                enabled: cache_enabled,
            })
            .unwrap(),
        );

        Harness {
            db: CachedDatabase::new(pool, cache),
            statements,
            _tmp: tmp,
            _listener: listener,
        }
    }

    const LISTING: &str = "SELECT id, name FROM employees ORDER BY id LIMIT $1";

    #[test]
    fn test_second_read_comes_from_cache() {
        let h = harness(sample_rows(), true);
        let params = [Value::Int(10)];

        let first = h.db.cached_query(LISTING, &params, None).unwrap();
        let second = h.db.cached_query(LISTING, &params, None).unwrap();

        assert_eq!(first, sample_rows());
        assert_eq!(second, first);
        assert_eq!(h.statements.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_round_trip_preserves_value_types() {
        let h = harness(sample_rows(), true);

        h.db.cached_query(LISTING, &[], None).unwrap();
        let cached = h.db.cached_query(LISTING, &[], None).unwrap();
        let row = &cached[0];

        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("name"), Some(&Value::Text("Mina".to_string())));
        assert_eq!(row.get("salary"), Some(&Value::Float(4200.5)));
        assert_eq!(row.get("active"), Some(&Value::Bool(true)));
        assert_eq!(row.get("badge"), Some(&Value::Bytes(vec![0xca, 0xfe])));
        assert!(row.get("note").unwrap().is_null());
    }

    #[test]
    fn test_expired_entry_reexecutes() {
        let h = harness(sample_rows(), true);

        h.db.cached_query(LISTING, &[], Some(Duration::from_secs(1)))
            .unwrap();
        sleep(Duration::from_millis(1400));
        h.db.cached_query(LISTING, &[], Some(Duration::from_secs(1)))
            .unwrap();

        assert_eq!(h.statements.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_different_params_cache_separately() {
        let h = harness(sample_rows(), true);

        h.db.cached_query(LISTING, &[Value::Int(1)], None).unwrap();
        h.db.cached_query(LISTING, &[Value::Int(2)], None).unwrap();
        h.db.cached_query(LISTING, &[Value::Int(1)], None).unwrap();

        assert_eq!(h.statements.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_key_distinguishes_param_types() {
        assert_ne!(
            query_cache_key("SELECT $1", &[Value::Int(1)]),
            query_cache_key("SELECT $1", &[Value::Text("1".to_string())])
        );
    }

    #[test]
    fn test_invalidate_query_forces_reexecution() {
        let h = harness(sample_rows(), true);

        h.db.cached_query(LISTING, &[], None).unwrap();
        assert!(h.db.invalidate_query(LISTING, &[]));
        h.db.cached_query(LISTING, &[], None).unwrap();

        assert_eq!(h.statements.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_category_flushes_only_that_category() {
        let h = harness(sample_rows(), true);

        h.db.cached_query(LISTING, &[Value::Int(1)], None).unwrap();
        h.db.cached_query(LISTING, &[Value::Int(2)], None).unwrap();
        h.db.cache().cache_api_response("payslips", 9, &[1, 2, 3], None);

        assert_eq!(h.db.invalidate_category(Category::Queries), 2);

        // The api entry survives; both query results are gone.
        assert_eq!(
            h.db.cache().cached_api_response::<Vec<i32>>("payslips", 9),
            Some(vec![1, 2, 3])
        );
        h.db.cached_query(LISTING, &[Value::Int(1)], None).unwrap();
        assert_eq!(h.statements.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_bypass_query_never_caches() {
        let h = harness(sample_rows(), true);

        h.db.query(LISTING, &[]).unwrap();
        h.db.query(LISTING, &[]).unwrap();
        // Nothing was stored for the cached path to pick up either.
        h.db.cached_query(LISTING, &[], None).unwrap();

        assert_eq!(h.statements.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_execute_counts_as_statement() {
        let h = harness(sample_rows(), true);

        let affected =
            h.db.execute("UPDATE employees SET active = $1", &[Value::Bool(false)])
                .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(h.statements.load(Ordering::SeqCst), 1);
        // The session opened for the statement stays around for reuse.
        assert!(h.db.pool().stats().connected);
    }

    #[test]
    fn test_disabled_cache_degrades_to_live_queries() {
        let h = harness(sample_rows(), false);

        let first = h.db.cached_query(LISTING, &[], None).unwrap();
        let second = h.db.cached_query(LISTING, &[], None).unwrap();

        assert_eq!(first, second);
        assert_eq!(h.statements.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cached_listing_round_trips() {
        let h = harness(sample_rows(), true);
        let listing = PagedListing::new("employees", &["id", "name"], "id");

        let first = h.db.cached_listing(&listing, None).unwrap();
        let second = h.db.cached_listing(&listing, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(h.statements.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_aggregate_rejects_bad_identifier() {
        let h = harness(sample_rows(), true);
        let aggregate = Aggregate::new("employees; DROP TABLE x", AggregateFn::Count);

        assert!(h.db.cached_aggregate(&aggregate, None).is_err());
        assert_eq!(h.statements.load(Ordering::SeqCst), 0);
    }
}
