//! TCP reachability probing with a TTL result cache
//!
//! A full database handshake against a dead host burns its whole connect
//! timeout. A bounded TCP probe fails in milliseconds on refused ports and
//! respects the probe timeout on black holes, and its result is cached per
//! `host:port` so a burst of reconnect attempts does not probe the same
//! server over and over. Positive and negative results are cached alike.

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

/// Result of one reachability check
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    /// `host:port` probed
    pub address: String,
    /// Whether a TCP connection could be opened
    pub reachable: bool,
    /// Time the live probe took, in milliseconds
    pub latency_ms: u64,
    /// True when served from the cache instead of the wire
    pub cached: bool,
    /// Failure detail for unreachable servers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

struct CachedProbe {
    reachable: bool,
    latency_ms: u64,
    detail: Option<String>,
    at: Instant,
}

/// Reachability prober with per-address result caching
pub struct ProbeCache {
    timeout: Duration,
    ttl: Duration,
    results: Mutex<HashMap<String, CachedProbe, RandomState>>,
}

impl ProbeCache {
    /// Create a prober with the given per-probe timeout and cache TTL
    pub fn new(timeout: Duration, ttl: Duration) -> Self {
        ProbeCache {
            timeout,
            ttl,
            results: Mutex::new(HashMap::default()),
        }
    }

    /// Check `host:port`, reusing a cached result younger than the TTL
    pub fn check(&self, host: &str, port: u16) -> ProbeResult {
        let address = format!("{}:{}", host, port);
        {
            let results = self.results.lock();
            if let Some(hit) = results.get(&address) {
                if hit.at.elapsed() < self.ttl {
                    return ProbeResult {
                        address,
                        reachable: hit.reachable,
                        latency_ms: hit.latency_ms,
                        cached: true,
                        detail: hit.detail.clone(),
                    };
                }
            }
        }

        let started = Instant::now();
        let outcome = probe_once(host, port, self.timeout);
        let latency_ms = started.elapsed().as_millis() as u64;
        let (reachable, detail) = match outcome {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        debug!(address = %address, reachable, latency_ms, "probed server");

        let mut results = self.results.lock();
        results.insert(
            address.clone(),
            CachedProbe {
                reachable,
                latency_ms,
                detail: detail.clone(),
                at: Instant::now(),
            },
        );
        ProbeResult {
            address,
            reachable,
            latency_ms,
            cached: false,
            detail,
        }
    }

    /// Drop every cached result so the next check hits the wire
    pub fn invalidate(&self) {
        self.results.lock().clear();
    }
}

fn probe_once(host: &str, port: u16, timeout: Duration) -> std::result::Result<(), String> {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        // Resolution failure counts as unreachable, not as an error.
        Err(e) => return Err(format!("resolve failed: {}", e)),
    };
    let mut last = format!("{} did not resolve to any address", host);
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(e) => last = format!("connect to {} failed: {}", addr, e),
        }
    }
    Err(last)
}
