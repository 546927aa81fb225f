//! Server descriptors and pool tuning knobs
//!
//! Everything here deserializes straight out of a config file. Durations
//! are stored as plain integers (`*_secs`, `*_ms`) with accessor methods
//! returning [`Duration`].

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Network location and credentials of one database server
#[derive(Clone, Deserialize)]
pub struct ServerDescriptor {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database to open
    pub dbname: String,
    /// Role to authenticate as
    pub user: String,
    /// Password for `user`
    #[serde(default)]
    pub password: String,
}

fn default_port() -> u16 {
    5432
}

impl ServerDescriptor {
    /// `host:port` rendering used in logs and probe keys
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Credentials stay out of logs.
impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Tuning knobs for the connection keeper
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Seconds a handle may live before it is replaced
    pub max_age_secs: u64,
    /// Connection attempts per server before moving to the next one
    pub retry_attempts: u32,
    /// Milliseconds slept between consecutive attempts
    pub retry_delay_ms: u64,
    /// Whether fallback servers are tried after the primary
    pub enable_fallbacks: bool,
    /// Seconds allowed for one connection handshake
    pub connect_timeout_secs: u64,
    /// Seconds allowed for one TCP reachability probe
    pub probe_timeout_secs: u64,
    /// Seconds a probe result stays cached per `host:port`
    pub probe_cache_ttl_secs: u64,
    /// Ask for a keepalive (persistent style) session first
    pub persistent: bool,
    /// SQL executed once on every fresh connection
    pub init_sql: Option<String>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            max_age_secs: 3600,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            enable_fallbacks: true,
            connect_timeout_secs: 30,
            probe_timeout_secs: 5,
            probe_cache_ttl_secs: 300,
            persistent: true,
            init_sql: None,
        }
    }
}

impl PoolSettings {
    /// Handle lifetime as a `Duration`
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Sleep between attempts as a `Duration`
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Handshake timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Probe timeout as a `Duration`
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Probe cache lifetime as a `Duration`
    pub fn probe_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.probe_cache_ttl_secs)
    }
}

/// Ordered server list plus tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Server tried first
    pub primary: ServerDescriptor,
    /// Servers tried in order when the primary fails
    #[serde(default)]
    pub fallbacks: Vec<ServerDescriptor>,
    /// Tuning knobs
    #[serde(default)]
    pub settings: PoolSettings,
}

impl PoolConfig {
    /// Configuration with a single server and default tuning
    pub fn single(primary: ServerDescriptor) -> Self {
        PoolConfig {
            primary,
            fallbacks: Vec::new(),
            settings: PoolSettings::default(),
        }
    }

    /// Servers in connection order.
    ///
    /// The primary always comes first; fallbacks follow only while
    /// `enable_fallbacks` is set.
    pub fn servers(&self) -> Vec<&ServerDescriptor> {
        let mut servers = vec![&self.primary];
        if self.settings.enable_fallbacks {
            servers.extend(self.fallbacks.iter());
        }
        servers
    }

    /// Every configured server regardless of the `enable_fallbacks`
    /// switch. Diagnostics probe this list.
    pub fn all_servers(&self) -> Vec<&ServerDescriptor> {
        let mut servers = vec![&self.primary];
        servers.extend(self.fallbacks.iter());
        servers
    }
}
