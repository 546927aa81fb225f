//! Single-handle connection keeper
//!
//! One live database session per pool, created lazily, verified on every
//! acquisition and replaced when it ages out or stops answering. When the
//! session must be rebuilt the pool walks the configured servers in order,
//! gating each attempt on a cheap TCP probe, and gives up only after every
//! server has used up its attempts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, ServerDescriptor};
use crate::connector::{ConnectOptions, Connection, Connector, Liveness, Row, Value};
use crate::error::{Error, Result};
use crate::pg::PgConnector;
use crate::probe::{ProbeCache, ProbeResult};

#[derive(Debug)]
struct LiveConnection {
    conn: Box<dyn Connection>,
    id: u64,
    created: Instant,
    server_index: usize,
    server_address: String,
    persistent: bool,
}

struct PoolState {
    live: Option<LiveConnection>,
    max_age: Duration,
}

/// Keeper of one reusable database session
pub struct ConnectionPool {
    connector: Box<dyn Connector>,
    config: PoolConfig,
    probe: ProbeCache,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Pool backed by the PostgreSQL connector
    pub fn new(config: PoolConfig) -> Self {
        Self::with_connector(config, Box::new(PgConnector::new()))
    }

    /// Pool backed by a caller-supplied connector (tests, other backends)
    pub fn with_connector(config: PoolConfig, connector: Box<dyn Connector>) -> Self {
        let settings = &config.settings;
        let probe = ProbeCache::new(settings.probe_timeout(), settings.probe_cache_ttl());
        let max_age = settings.max_age();
        ConnectionPool {
            connector,
            probe,
            state: Mutex::new(PoolState { live: None, max_age }),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Acquire the shared session, creating or replacing it as needed.
    ///
    /// The returned guard holds the pool lock, so exactly one caller at a
    /// time talks to the session. An aged-out handle is replaced before
    /// use; an age-valid handle is returned only after it answers a
    /// liveness round trip. A dead handle is never handed out.
    ///
    /// # Errors
    ///
    /// [`Error::Exhausted`] once every server has used up its attempts.
    pub fn connection(&self) -> Result<PooledConnection<'_>> {
        let mut state = self.state.lock();
        self.ensure_live(&mut state)?;
        // ensure_live leaves a live handle behind on success.
        Ok(PooledConnection {
            inner: MutexGuard::map(state, |s| {
                s.live.as_mut().expect("live connection after ensure_live")
            }),
        })
    }

    fn ensure_live(&self, state: &mut PoolState) -> Result<()> {
        if let Some(live) = state.live.as_mut() {
            if live.created.elapsed() > state.max_age {
                debug!(id = live.id, "connection aged out, replacing");
                state.live = None;
            } else {
                match live.conn.ping() {
                    Liveness::Alive => return Ok(()),
                    Liveness::Dead(reason) => {
                        warn!(id = live.id, "connection died, replacing: {}", reason);
                        state.live = None;
                    }
                }
            }
        }
        let live = self.establish()?;
        state.live = Some(live);
        Ok(())
    }

    fn establish(&self) -> Result<LiveConnection> {
        let servers = self.config.servers();
        let settings = &self.config.settings;
        let mut attempts = 0u32;
        let mut last = String::from("no connection attempt was made");

        for (index, server) in servers.iter().enumerate() {
            for _ in 0..settings.retry_attempts {
                if attempts > 0 {
                    thread::sleep(settings.retry_delay());
                }
                attempts += 1;

                let probe = self.probe.check(&server.host, server.port);
                if !probe.reachable {
                    last = probe
                        .detail
                        .unwrap_or_else(|| format!("{} unreachable", probe.address));
                    debug!(server = %server.address(), attempt = attempts, "skipping unreachable server");
                    continue;
                }

                match self.try_connect(server) {
                    Ok((conn, persistent)) => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        info!(server = %server.address(), id, persistent, "database connection established");
                        return Ok(LiveConnection {
                            conn,
                            id,
                            created: Instant::now(),
                            server_index: index,
                            server_address: server.address(),
                            persistent,
                        });
                    }
                    Err(e) => {
                        warn!(server = %server.address(), attempt = attempts, "connection attempt failed: {}", e);
                        last = e.to_string();
                    }
                }
            }
        }

        Err(Error::Exhausted { attempts, last })
    }

    fn try_connect(&self, server: &ServerDescriptor) -> Result<(Box<dyn Connection>, bool)> {
        let settings = &self.config.settings;
        let mut options = ConnectOptions {
            connect_timeout: settings.connect_timeout(),
            persistent: settings.persistent,
            init_sql: settings.init_sql.clone(),
        };
        match self.connector.connect(server, &options) {
            Ok(conn) => Ok((conn, options.persistent)),
            Err(first) if options.persistent => {
                // A keepalive session can be refused where a plain one is
                // fine. Retry once without it before burning the attempt.
                warn!(server = %server.address(), "persistent connect failed, retrying plain: {}", first);
                options.persistent = false;
                match self.connector.connect(server, &options) {
                    Ok(conn) => Ok((conn, false)),
                    Err(second) => Err(second),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Snapshot of the keeper without touching the network
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let mut stats = PoolStats {
            connected: false,
            connection_id: None,
            age_secs: None,
            persistent: None,
            server_index: None,
            server: None,
            max_age_secs: state.max_age.as_secs(),
            configured_servers: self.config.all_servers().len(),
        };
        if let Some(live) = &state.live {
            stats.connected = true;
            stats.connection_id = Some(live.id);
            stats.age_secs = Some(live.created.elapsed().as_secs());
            stats.persistent = Some(live.persistent);
            stats.server_index = Some(live.server_index);
            stats.server = Some(live.server_address.clone());
        }
        stats
    }

    /// Stats plus a reachability report for every configured server.
    ///
    /// Fallbacks are probed even while disabled; an operator asking for
    /// diagnostics wants the whole picture. Probe results land in the
    /// shared cache, so diagnostics right after a reconnect are cheap.
    pub fn diagnostics(&self) -> PoolDiagnostics {
        let servers = self
            .config
            .all_servers()
            .iter()
            .enumerate()
            .map(|(index, server)| ServerProbe {
                index,
                probe: self.probe.check(&server.host, server.port),
            })
            .collect();
        PoolDiagnostics {
            stats: self.stats(),
            servers,
        }
    }

    /// Drop the live session; the next acquisition rebuilds it
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(live) = state.live.take() {
            info!(id = live.id, "closing database connection");
        }
    }

    /// Override the maximum session age at runtime
    pub fn set_max_age(&self, max_age: Duration) {
        self.state.lock().max_age = max_age;
    }

    /// Current maximum session age
    pub fn max_age(&self) -> Duration {
        self.state.lock().max_age
    }

    /// Drop cached probe results so the next reconnect reprobes everything
    pub fn invalidate_probes(&self) {
        self.probe.invalidate();
    }
}

/// Exclusive access to the pool's live session.
///
/// Holds the pool lock for its lifetime; drop it as soon as the work is
/// done.
#[derive(Debug)]
pub struct PooledConnection<'a> {
    inner: MappedMutexGuard<'a, LiveConnection>,
}

impl PooledConnection<'_> {
    /// Run a query and return every row
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.inner.conn.query(sql, params)
    }

    /// Run a statement and return the number of rows affected
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner.conn.execute(sql, params)
    }

    /// Identity of the underlying session, stable across reuse
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Index into the configured server list this session talks to
    pub fn server_index(&self) -> usize {
        self.inner.server_index
    }

    /// Whether the session was established with keepalives
    pub fn persistent(&self) -> bool {
        self.inner.persistent
    }

    /// Time since the session was established
    pub fn age(&self) -> Duration {
        self.inner.created.elapsed()
    }
}

/// Point-in-time view of the keeper
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Whether a live session exists right now
    pub connected: bool,
    /// Identity of the live session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<u64>,
    /// Seconds since the live session was established
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
    /// Whether the live session uses keepalives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    /// Index of the server the live session talks to (0 = primary)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_index: Option<usize>,
    /// `host:port` of that server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Configured maximum session age, seconds
    pub max_age_secs: u64,
    /// Number of configured servers, fallbacks included
    pub configured_servers: usize,
}

/// Reachability report for one configured server
#[derive(Debug, Clone, Serialize)]
pub struct ServerProbe {
    /// Position in the configured server list (0 = primary)
    pub index: usize,
    /// Probe outcome
    #[serde(flatten)]
    pub probe: ProbeResult,
}

/// Stats plus per-server reachability
#[derive(Debug, Clone, Serialize)]
pub struct PoolDiagnostics {
    /// Session snapshot
    pub stats: PoolStats,
    /// One probe row per configured server
    pub servers: Vec<ServerProbe>,
}
