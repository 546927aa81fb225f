//! tetherctl - operations CLI for the tether database pool and file cache
//!
//! Reads the same TOML configuration the services use and answers the
//! questions an operator asks during an incident: which servers are
//! reachable, can we actually get a connection, and what is sitting in
//! the file cache.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tethercache::{CacheConfig, Category, FileCache};
use tetherdb::{
    ConnectionPool, PoolConfig, PoolDiagnostics, PoolSettings, ServerDescriptor, ServerProbe,
};

#[derive(Parser, Debug)]
#[command(
    name = "tetherctl",
    author,
    version,
    about = "Inspect and manage the tether database pool and file cache"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tether.toml", global = true)]
    config: PathBuf,

    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show configuration summary and per-server reachability
    Status,
    /// Acquire a connection and report which server answered
    Ping,
    /// Probe every configured server over TCP
    Probe,
    /// Inspect or maintain the file cache
    Cache(CacheArgs),
}

#[derive(Parser, Debug)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommands,
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show entry counts and sizes per category
    Stats,
    /// Delete expired entries and report how many were removed
    Clean,
    /// Delete entries, all categories unless one is named
    Clear {
        /// Category to clear (queries, api, users, dashboard, mobile, general)
        #[arg(long)]
        category: Option<String>,
    },
}

/// On-disk configuration shared with the services.
///
/// `[primary]` and `[[fallbacks]]` describe servers, `[pool]` tunes the
/// connection keeper and `[cache]` places the file cache. Everything but
/// the primary server is optional.
#[derive(Debug, Deserialize)]
struct FileConfig {
    primary: ServerDescriptor,
    #[serde(default)]
    fallbacks: Vec<ServerDescriptor>,
    #[serde(default)]
    pool: PoolSettings,
    #[serde(default)]
    cache: CacheConfig,
}

impl FileConfig {
    fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            primary: self.primary.clone(),
            fallbacks: self.fallbacks.clone(),
            settings: self.pool.clone(),
        }
    }

    fn open_cache(&self) -> Result<FileCache> {
        FileCache::open(self.cache.clone())
            .with_context(|| format!("cannot open cache at {}", self.cache.root.display()))
    }
}

fn load_config(path: &Path) -> Result<FileConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match &cli.command {
        Commands::Status => run_status(&cli, &config),
        Commands::Ping => run_ping(&cli, &config),
        Commands::Probe => run_probe(&cli, &config),
        Commands::Cache(args) => run_cache(&cli, &config, args),
    }
}

#[derive(Serialize)]
struct StatusReport {
    generated_at: String,
    servers_configured: usize,
    fallbacks_enabled: bool,
    persistent: bool,
    max_age_secs: u64,
    cache_enabled: bool,
    cache_root: String,
    diagnostics: PoolDiagnostics,
}

fn run_status(cli: &Cli, config: &FileConfig) -> Result<()> {
    let pool = ConnectionPool::new(config.pool_config());
    let report = StatusReport {
        generated_at: chrono::Utc::now().to_rfc3339(),
        servers_configured: 1 + config.fallbacks.len(),
        fallbacks_enabled: config.pool.enable_fallbacks,
        persistent: config.pool.persistent,
        max_age_secs: pool.max_age().as_secs(),
        cache_enabled: config.cache.enabled,
        cache_root: config.cache.root.display().to_string(),
        diagnostics: pool.diagnostics(),
    };

    if cli.json {
        return emit(&report);
    }
    println!("tether status at {}", report.generated_at);
    println!(
        "  servers: {} configured, fallbacks {}",
        report.servers_configured,
        on_off(report.fallbacks_enabled)
    );
    println!(
        "  session: persistent={} max_age={}s",
        report.persistent, report.max_age_secs
    );
    println!(
        "  cache:   {} ({})",
        report.cache_root,
        on_off(report.cache_enabled)
    );
    print_probes(&report.diagnostics.servers);
    Ok(())
}

#[derive(Serialize)]
struct PingReport {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    persistent: Option<bool>,
    round_trip_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn run_ping(cli: &Cli, config: &FileConfig) -> Result<()> {
    let pool = ConnectionPool::new(config.pool_config());
    let started = Instant::now();
    // The guard holds the pool lock; it must drop before stats().
    let acquired = match pool.connection() {
        Ok(conn) => Ok((conn.id(), conn.persistent())),
        Err(e) => Err(e),
    };
    let round_trip_ms = started.elapsed().as_millis() as u64;

    match acquired {
        Ok((id, persistent)) => {
            let server = pool.stats().server;
            if cli.json {
                return emit(&PingReport {
                    connected: true,
                    connection_id: Some(id),
                    server,
                    persistent: Some(persistent),
                    round_trip_ms,
                    error: None,
                });
            }
            println!(
                "connected: id={} server={} persistent={} in {}ms",
                id,
                server.as_deref().unwrap_or("?"),
                persistent,
                round_trip_ms
            );
            Ok(())
        }
        Err(e) => {
            if cli.json {
                emit(&PingReport {
                    connected: false,
                    connection_id: None,
                    server: None,
                    persistent: None,
                    round_trip_ms,
                    error: Some(e.to_string()),
                })?;
            } else {
                eprintln!("database unavailable: {}", e);
            }
            std::process::exit(1);
        }
    }
}

fn run_probe(cli: &Cli, config: &FileConfig) -> Result<()> {
    let pool = ConnectionPool::new(config.pool_config());
    let diagnostics = pool.diagnostics();

    if cli.json {
        return emit(&diagnostics.servers);
    }
    print_probes(&diagnostics.servers);
    Ok(())
}

fn run_cache(cli: &Cli, config: &FileConfig, args: &CacheArgs) -> Result<()> {
    let cache = config.open_cache()?;
    match &args.command {
        CacheCommands::Stats => {
            let usage = cache.usage();
            if cli.json {
                return emit(&usage);
            }
            for row in &usage.categories {
                println!(
                    "  {:<9} {:>6} entries {:>10} bytes",
                    row.category.to_string(),
                    row.entries,
                    row.bytes
                );
            }
            println!(
                "  {:<9} {:>6} entries {:>10} bytes",
                "total",
                usage.total_entries(),
                usage.total_bytes()
            );
            Ok(())
        }
        CacheCommands::Clean => {
            let removed = cache.clean_expired();
            report_removed(cli, removed, "expired entries")
        }
        CacheCommands::Clear { category } => {
            let category = parse_category(category.as_deref())?;
            let removed = cache.clear(category);
            report_removed(cli, removed, "entries")
        }
    }
}

fn parse_category(raw: Option<&str>) -> Result<Option<Category>> {
    raw.map(|s| s.parse::<Category>().map_err(|e| anyhow!("{}", e)))
        .transpose()
}

fn report_removed(cli: &Cli, removed: u64, what: &str) -> Result<()> {
    if cli.json {
        return emit(&serde_json::json!({ "removed": removed }));
    }
    println!("removed {} {}", removed, what);
    Ok(())
}

fn print_probes(servers: &[ServerProbe]) {
    for server in servers {
        let state = if server.probe.reachable {
            "reachable"
        } else {
            "unreachable"
        };
        let cached = if server.probe.cached { " (cached)" } else { "" };
        match &server.probe.detail {
            Some(detail) => println!(
                "  [{}] {} {} in {}ms{}: {}",
                server.index, server.probe.address, state, server.probe.latency_ms, cached, detail
            ),
            None => println!(
                "  [{}] {} {} in {}ms{}",
                server.index, server.probe.address, state, server.probe.latency_ms, cached
            ),
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
