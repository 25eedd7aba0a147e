use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::rngs::OsRng;
use tokio::signal;
use tracing::{info, Level};

use blitz::config::BlitzConfig;
use blitz::http::{Blitz, BlitzServer, ReverseProxy};

/// Blitz - Rate-limiting reverse proxy with signed reservation tokens
#[derive(Parser, Debug)]
#[command(name = "blitz")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Address to bind to
    #[arg(short = 'b', long = "bind")]
    bind: Option<String>,

    /// Upstream URL admitted requests are proxied to
    #[arg(short = 't', long = "target")]
    target: Option<String>,

    /// Burst size of a queue; repeat for more queues, highest priority last
    #[arg(short = 'q', long = "queue")]
    queues: Vec<u64>,

    /// Refill interval in milliseconds
    #[arg(long = "every-ms")]
    every_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Blitz");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration with CLI overrides
    let mut config = match args.config.as_deref() {
        Some(path) => BlitzConfig::from_file(path)?,
        None => BlitzConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.server.bind_addr = bind.parse()?;
    }
    if let Some(target) = args.target {
        config.server.upstream = Some(target);
    }
    if !args.queues.is_empty() {
        config.limits.queues = args.queues;
    }
    if let Some(every_ms) = args.every_ms {
        config.limits.refill_interval_ms = every_ms;
    }

    let upstream = config
        .server
        .upstream
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no upstream target configured (use --target)"))?;

    info!(
        bind_addr = %config.server.bind_addr,
        upstream = %upstream,
        queues = ?config.limits.queues,
        refill_interval_ms = config.limits.refill_interval_ms,
        "Configuration loaded"
    );

    // Build the proxy and the admission engine around it
    let proxy = ReverseProxy::new(&upstream)?;
    let engine = Arc::new(Blitz::new(
        &mut OsRng,
        proxy,
        Duration::from_millis(config.limits.refill_interval_ms),
        &config.limits.queues,
    )?);

    let server = BlitzServer::new(config.server.bind_addr, engine);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Blitz stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
