//! Stream Resolver daemon
//!
//! Loads configuration, builds the resolver and serves the REST API next to
//! health and Prometheus listeners. The prefetch scheduler and the expired
//! entry sweep run in the background until Ctrl-C.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stream_resolver::api::{run_health_server, run_metrics_server};
use stream_resolver::{ApiServer, ApiServerConfig, Resolver, ResolverConfig, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Stream Resolver - tiered stream cache, prefetching and playback upgrade
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short = 'c', env = "RESOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR")]
    health_addr: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Durable tier directory, in-memory when unset
    #[arg(long, env = "DURABLE_PATH")]
    durable_path: Option<PathBuf>,

    /// Extraction service base URL
    #[arg(long, env = "EXTRACTION_URL")]
    extraction_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// File configuration with command line overrides applied
    fn resolver_config(&self) -> Result<ResolverConfig> {
        let mut config = match &self.config {
            Some(path) => ResolverConfig::load(path)?,
            None => ResolverConfig::default(),
        };

        if let Some(addr) = &self.api_addr {
            config.api.rest_addr = addr.clone();
        }
        if let Some(addr) = &self.health_addr {
            config.api.health_addr = addr.clone();
        }
        if let Some(addr) = &self.metrics_addr {
            config.api.metrics_addr = addr.clone();
        }
        if let Some(path) = &self.durable_path {
            config.durable.path = Some(path.clone());
        }
        if let Some(url) = &self.extraction_url {
            config.extraction.base_url = url.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.resolver_config()?;

    info!("Starting Stream Resolver");
    info!("  Version: {}", stream_resolver::VERSION);
    info!("  REST API: {}", config.api.rest_addr);
    info!("  Extraction: {}", config.extraction.base_url);
    info!(
        "  Durable tier: {}",
        config
            .durable
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "in-memory".into())
    );

    let rest_addr = config.api.rest_socket()?;
    let health_addr = config.api.health_socket()?;
    let metrics_addr = config.api.metrics_socket()?;

    let resolver = Resolver::from_config(config).await?;
    if !resolver.is_ready().await {
        error!("Durable tier not answering at startup, serving from the fast tier only");
    }

    let shutdown = CancellationToken::new();
    let background = resolver.spawn_background(shutdown.clone());

    // Start health server
    {
        let resolver = Arc::clone(&resolver);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_addr, resolver, shutdown).await {
                error!("Health server error: {}", e);
            }
        });
    }

    // Start metrics server
    {
        let resolver = Arc::clone(&resolver);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics_addr, resolver, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    // Stop everything on Ctrl-C
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Cannot listen for shutdown signal: {}", e),
            }
            shutdown.cancel();
        });
    }

    let api_server = ApiServer::new(
        ApiServerConfig { rest_addr },
        Arc::clone(&resolver),
        shutdown.clone(),
    );
    let served = api_server.run().await;

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }
    resolver.lifecycle().cleanup();

    served?;
    info!("Resolver shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
