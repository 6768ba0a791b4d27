//! SMTP Tracking Proxy Binary

use anyhow::{Context, Result};
use clap::Parser;
use smtp_track_proxy::config::{Config, generate_example_config};
use smtp_track_proxy::{Backend, DebugSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

/// SMTP proxy that adds engagement tracking to relayed mail
#[derive(Parser, Debug)]
#[command(name = "smtp-track-proxy")]
#[command(about = "SMTP proxy that adds open and click tracking to HTML mail")]
#[command(version = smtp_track_proxy::VERSION)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Upstream relay host:port (overrides the config file)
    #[arg(short, long)]
    upstream: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Tracking base URL (overrides the config file)
    #[arg(short, long)]
    tracking_url: Option<String>,

    /// Log every command exchange
    #[arg(short, long)]
    verbose: bool,

    /// Skip upstream certificate verification
    #[arg(long)]
    insecure_skip_verify: bool,

    /// Write a copy of every rewritten message to this file
    #[arg(long)]
    upstream_data_debug: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{}", generate_example_config());
        return Ok(());
    }

    // Initialize logging
    let level = if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load config
    let mut config = if args.config.exists() {
        Config::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        info!("No config file found, using defaults");
        Config::default()
    };

    if let Some(upstream) = args.upstream {
        config.proxy.upstream = upstream;
    }
    if let Some(port) = args.port {
        config.proxy.port = port;
    }
    if let Some(url) = args.tracking_url {
        config.tracking.url = Some(url);
    }
    if let Some(path) = args.upstream_data_debug {
        config.proxy.upstream_data_debug = Some(path.display().to_string());
    }
    config.proxy.verbose |= args.verbose;
    config.proxy.insecure_skip_verify |= args.insecure_skip_verify;

    let mut settings = config.backend_settings()?;
    if let Some(path) = &config.proxy.upstream_data_debug {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening upstream data debug file {path}"))?;
        info!("Mirroring upstream DATA to {}", path);
        settings.debug_sink = Some(DebugSink::new(file));
    }

    info!("SMTP Tracking Proxy {}", smtp_track_proxy::VERSION);
    match &settings.wrapper {
        Some(wrapper) => info!(
            "Tracking via {} (open={}, initial_open={}, click={})",
            wrapper.url(),
            wrapper.track_open(),
            wrapper.track_initial_open(),
            wrapper.track_link()
        ),
        None => warn!("No tracking URL configured, relaying mail unchanged"),
    }
    if config.proxy.insecure_skip_verify {
        warn!("Upstream certificate verification is disabled");
    }

    let backend = Arc::new(Backend::new(settings));
    smtp_track_proxy::server::run_server(config.proxy, backend).await?;

    Ok(())
}
