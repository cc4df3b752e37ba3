//! offsync CLI - drive an offline-capable API client from the terminal.
//!
//! Reads go through the response cache, writes are queued while the API is
//! unreachable, and `sync` replays the queue once it is back.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use offsync_sync::{
    DirtyRegistry, OfflineClient, OfflineConfig, StoreConfig, SyncEvent, SyncMode, SyncReport,
    SyncScheduler,
};
use offsync_transport::{HttpRequest, HttpResponse, Method};

#[derive(Parser)]
#[command(name = "offsync")]
#[command(about = "offsync - offline-first HTTP client")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for cached responses and the mutation queue.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Base URL of the API; overrides the configuration file.
    #[arg(long, global = true)]
    base_url: Option<Url>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a resource, falling back to the cache when offline.
    Get {
        /// Path relative to the base URL.
        path: String,
    },

    /// Send a mutating request, queueing it when offline.
    Send {
        /// HTTP method, e.g. POST, PUT, PATCH or DELETE.
        method: String,

        /// Path relative to the base URL.
        path: String,

        /// JSON request body.
        #[arg(short, long)]
        body: Option<String>,
    },

    /// Replay queued mutations now.
    Sync,

    /// List queued mutations.
    Queue {
        /// Drop every queued mutation instead of listing.
        #[arg(long)]
        clear: bool,
    },

    /// Show the cached snapshot for a path.
    Cache {
        /// Path relative to the base URL.
        path: String,
    },

    /// Sync periodically until interrupted.
    Watch {
        /// Seconds between sync attempts.
        #[arg(short, long, default_value = "30")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref(), cli.store_dir, cli.base_url)?;
    let client = OfflineClient::from_config(&config, DirtyRegistry::new())
        .context("Failed to set up client")?;

    match cli.command {
        Commands::Get { path } => cmd_get(&client, &path).await,

        Commands::Send { method, path, body } => cmd_send(&client, &method, &path, body).await,

        Commands::Sync => cmd_sync(&client).await,

        Commands::Queue { clear } => cmd_queue(&client, clear).await,

        Commands::Cache { path } => cmd_cache(&client, &path).await,

        Commands::Watch { interval } => cmd_watch(&client, interval).await,
    }
}

/// Build the effective configuration: file, then command-line overrides.
fn load_config(
    path: Option<&Path>,
    store_dir: Option<PathBuf>,
    base_url: Option<Url>,
) -> Result<OfflineConfig> {
    let mut config = match path {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => OfflineConfig::default(),
    };

    if let Some(dir) = store_dir {
        config.store = StoreConfig::local(dir);
    } else if path.is_none() {
        let dir = dirs::data_dir()
            .context("No data directory on this platform; pass --store-dir")?
            .join("offsync");
        config.store = StoreConfig::local(dir);
    }

    if let Some(url) = base_url {
        config.base_url = Some(url);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Print a response status line and body.
async fn print_response(response: HttpResponse) -> Result<()> {
    println!(
        "{} {}",
        response.status.as_u16(),
        response.reason_phrase()
    );
    let body = response.text().await.context("Failed to read body")?;
    if !body.is_empty() {
        println!("{}", body);
    }
    Ok(())
}

async fn cmd_get(client: &OfflineClient, path: &str) -> Result<()> {
    info!("GET {}", path);
    let response = client.get(path).await.context("Request failed")?;
    print_response(response).await
}

async fn cmd_send(
    client: &OfflineClient,
    method: &str,
    path: &str,
    body: Option<String>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid method: {}", method))?;
    let url = client.resolve(path).context("Invalid path")?;

    let request = match body {
        Some(body) => HttpRequest::with_json(method, url, body),
        None => HttpRequest::new(method, url),
    };
    if !request.is_mutation() {
        warn!("{} is not a mutating method; it will not be queued", request.method);
    }

    let response = client.send(request).await.context("Request failed")?;
    print_response(response).await
}

fn print_report(report: &SyncReport) {
    println!("Sync finished in {:?}", report.duration);
    println!("  Replayed:  {}", report.replayed);
    println!("  Discarded: {}", report.discarded);
    println!("  Cleaned:   {}", report.cleaned);
    println!("  Remaining: {}", report.remaining);
    if let Some(reason) = &report.halted {
        println!("  Halted:    {}", reason);
    }
}

async fn cmd_sync(client: &OfflineClient) -> Result<()> {
    let report = client.sync().await.context("Sync failed")?;
    print_report(&report);
    Ok(())
}

async fn cmd_queue(client: &OfflineClient, clear: bool) -> Result<()> {
    if clear {
        let dropped = client
            .reconciler()
            .queue()
            .clear()
            .await
            .context("Failed to clear queue")?;
        println!("Dropped {} queued mutation(s)", dropped);
        return Ok(());
    }

    let pending = client.pending().await.context("Failed to read queue")?;
    if pending.is_empty() {
        println!("No queued mutations");
        return Ok(());
    }

    println!("{:<25} {:<8} URL", "QUEUED", "METHOD");
    for entry in pending {
        println!(
            "{:<25} {:<8} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.method,
            entry.url
        );
    }
    Ok(())
}

async fn cmd_cache(client: &OfflineClient, path: &str) -> Result<()> {
    match client.cached(path).await.context("Failed to read cache")? {
        Some(cached) => println!("{}", serde_json::to_string_pretty(&cached)?),
        None => println!("Nothing cached for {}", path),
    }
    Ok(())
}

/// Print sync events until the reconciler goes away. Returns how many were
/// printed.
async fn print_events(mut events: broadcast::Receiver<SyncEvent>) -> usize {
    let mut printed = 0;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event printer fell behind, skipped {} event(s)", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            SyncEvent::Replayed {
                url,
                method,
                status,
            } => println!("replayed  {} {} -> {}", method, url, status),
            SyncEvent::Discarded {
                url,
                method,
                reason,
                ..
            } => println!("discarded {} {} ({:?})", method, url, reason),
            SyncEvent::Halted { url, method, reason } => {
                println!("halted    {} {}: {}", method, url, reason)
            }
            SyncEvent::Cleaned { cache_key, .. } => println!("cleaned   {}", cache_key),
        }
        printed += 1;
    }
    printed
}

async fn cmd_watch(client: &OfflineClient, interval: u64) -> Result<()> {
    if interval == 0 {
        anyhow::bail!("Interval must be at least one second");
    }

    let (scheduler, handle) = SyncScheduler::new(SyncMode::Periodic {
        interval: Duration::from_secs(interval),
    });

    let reconciler = client.reconciler();
    let task = tokio::spawn(handle.run(move |_request| {
        let reconciler = reconciler.clone();
        async move { reconciler.sync().await }
    }));

    let printer = tokio::spawn(print_events(client.subscribe()));

    println!("Syncing every {}s, press Ctrl-C to stop", interval);
    let first = scheduler.request_sync().await.context("Initial sync failed")?;
    print_report(&first);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping");
    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replayed(n: u16) -> SyncEvent {
        SyncEvent::Replayed {
            url: format!("https://api.example.com/api/items/{}", n),
            method: "POST".to_string(),
            status: 200,
        }
    }

    #[tokio::test]
    async fn test_event_printer_survives_lag() {
        let (tx, rx) = broadcast::channel(2);
        for n in 0..5 {
            tx.send(replayed(n)).unwrap();
        }
        drop(tx);

        // The three oldest events are lost to lag; the rest still print.
        assert_eq!(print_events(rx).await, 2);
    }

    #[tokio::test]
    async fn test_event_printer_stops_when_closed() {
        let (tx, rx) = broadcast::channel::<SyncEvent>(4);
        drop(tx);

        assert_eq!(print_events(rx).await, 0);
    }
}
