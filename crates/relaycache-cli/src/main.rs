//! relaycache - command line front end for the resilient data access layer.
//!
//! Probes service health, issues requests through the retrying executor and
//! inspects or maintains the persisted lookup cache.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relaycache_core::api::{ConnectionProfile, RequestOptions};
use relaycache_core::{Config, DataLayer, OperationType};

/// File name prefix for rolling log files
const LOG_FILE_PREFIX: &str = "relaycache.log";

#[derive(Parser)]
#[command(name = "relaycache")]
#[command(author, version, about = "Resilient data access layer - cached lookups, health-gated requests", long_about = None)]
struct Cli {
    /// Also write logs to daily rolling files in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the service health endpoint
    Probe,

    /// Call an endpoint through the request executor
    Fetch {
        /// Endpoint path (joined to the base URL) or absolute URL
        path: String,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,

        /// Bearer token
        #[arg(long)]
        token: Option<String>,

        /// Treat the link as constrained (longer timeouts, slower backoff)
        #[arg(long)]
        constrained: bool,
    },

    /// Inspect and maintain the lookup cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Store a geocoding result for an address
    Geocode {
        /// Address the result belongs to
        address: String,

        /// Result as JSON, e.g. '{"lat": 40.7, "lng": -74.0}'
        #[arg(long)]
        value: String,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show hit/miss counters and entry counts per operation type
    Stats,
    /// List cached entries
    List,
    /// Remove expired entries
    Purge,
    /// Remove every entry and the snapshot
    Clear,
    /// Remove every entry of one operation type
    Invalidate {
        /// Operation type, e.g. geocoding, placePredictions
        operation: String,
    },
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`). With a log
/// directory the same events are also written to a daily rolling file; the
/// returned guard must be held until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    let config = Config::load()?;
    info!(base_url = %config.base_url, profile = %config.connection_profile, "relaycache starting");
    let layer = DataLayer::from_config(&config)?;

    let result = match cli.command {
        Commands::Probe => probe(&layer).await,
        Commands::Fetch {
            path,
            method,
            body,
            token,
            constrained,
        } => fetch(&layer, &path, &method, body.as_deref(), token, constrained).await,
        Commands::Cache { command } => cache(&layer, command),
        Commands::Geocode { address, value } => geocode(&layer, &address, &value),
    };

    // Failures are logged by the data layer; the command's own result wins
    let _ = layer.shutdown();
    result
}

async fn probe(layer: &DataLayer) -> Result<()> {
    let healthy = layer.health().probe().await;
    let snapshot = layer.health().snapshot();
    println!("url:                  {}", layer.health().config().health_url);
    println!("healthy:              {}", healthy);
    println!("consecutive failures: {}", snapshot.consecutive_failures);
    Ok(())
}

async fn fetch(
    layer: &DataLayer,
    path: &str,
    method: &str,
    body: Option<&str>,
    token: Option<String>,
    constrained: bool,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let cancel = CancellationToken::new();
    let mut options = RequestOptions::new().method(method).cancel_token(cancel.clone());
    if let Some(body) = body {
        let parsed: Value = serde_json::from_str(body).context("Request body is not valid JSON")?;
        options = options.json(&parsed)?;
    }
    if let Some(token) = token {
        options = options.bearer(token);
    }
    if constrained {
        options = options.profile(ConnectionProfile::Constrained);
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling request");
            cancel.cancel();
        }
    });

    let value = layer.execute(path, options).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cache(layer: &DataLayer, command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::Stats => {
            let stats = layer.cache_stats();
            let by_type = layer.with_cache(|store| store.entries_by_type());
            println!("entries:   {}", stats.entries);
            println!("hits:      {}", stats.hits);
            println!("misses:    {}", stats.misses);
            println!("expired:   {}", stats.expired);
            println!("evictions: {}", stats.evictions);
            for (operation, count) in by_type {
                println!("  {:<18} {}", operation, count);
            }
        }
        CacheCommand::List => {
            let rows = layer.with_cache(|store| {
                let now = store.now();
                let mut rows: Vec<(String, String, String)> = store
                    .iter()
                    .map(|(key, entry)| {
                        (
                            entry.operation_type.to_string(),
                            entry.age_display(now),
                            key.clone(),
                        )
                    })
                    .collect();
                rows.sort();
                rows
            });
            if rows.is_empty() {
                eprintln!("Cache is empty");
            }
            for (operation, age, key) in rows {
                println!("{:<18} {:>10}  {}", operation, age, key);
            }
        }
        CacheCommand::Purge => {
            let removed = layer.cache_purge_expired();
            eprintln!("Removed {} expired entries", removed);
        }
        CacheCommand::Clear => {
            layer.cache_clear();
            eprintln!("Cache cleared");
        }
        CacheCommand::Invalidate { operation } => {
            let operation = OperationType::from(operation);
            let removed = layer.cache_invalidate(&operation);
            eprintln!("Removed {} {} entries", removed, operation);
        }
    }
    Ok(())
}

fn geocode(layer: &DataLayer, address: &str, value: &str) -> Result<()> {
    let value: Value = serde_json::from_str(value).context("--value is not valid JSON")?;
    layer.cache_set(OperationType::Geocoding, json!({ "address": address }), &value);
    eprintln!("Cached geocoding result for {}", address);
    Ok(())
}
