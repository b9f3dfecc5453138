//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use drip_common::utils::logging::init_logging;
use drip_faucet::api;
use drip_faucet::{FaucetConfig, FaucetService, QuotaLedger, SolanaTokenLedger};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML, YAML or JSON)
    #[arg(short, long, env = "FAUCET_CONFIG")]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// Solana RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Mint of the dispensed token
    #[arg(long)]
    token_mint: Option<String>,

    /// Whole tokens per request
    #[arg(long)]
    tokens_per_request: Option<u64>,

    /// Successful requests per wallet/IP per window
    #[arg(long)]
    max_requests: Option<u32>,

    /// Quota window (seconds)
    #[arg(long)]
    quota_window: Option<u64>,

    /// Sweep expired quota records every N seconds
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = FaucetConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }

    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }

    if let Some(mint) = args.token_mint {
        config.token_mint = Some(mint);
    }

    if let Some(amount) = args.tokens_per_request {
        config.tokens_per_request = amount;
    }

    if let Some(max_requests) = args.max_requests {
        config.max_requests_per_window = max_requests;
    }

    if let Some(window) = args.quota_window {
        config.quota_window_secs = window;
    }

    if let Some(interval) = args.sweep_interval {
        config.sweep_interval_secs = Some(interval);
    }

    if args.debug {
        config.logging.level = "debug".to_string();
    }

    let _log_guard = init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!("Starting Drip Faucet v{}", env!("CARGO_PKG_VERSION"));

    let settings = config.resolve().context("invalid faucet configuration")?;

    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {}", settings.rpc_url);
    info!("  Mint: {}", settings.mint);
    info!("  Funding wallet: {}", settings.funding_wallet());
    info!("  Tokens per request: {}", settings.tokens_per_request);
    info!(
        "  Quota: {} requests / {}s per wallet/IP",
        settings.max_requests_per_window,
        settings.quota_window.as_secs()
    );

    let ledger = Arc::new(SolanaTokenLedger::new(settings.rpc_url.clone(), settings.commitment));
    let quota = QuotaLedger::new(settings.quota_window);
    let service = Arc::new(FaucetService::new(settings, quota, ledger)?);

    // Start quota sweep task
    if let Some(interval_secs) = config.sweep_interval_secs.filter(|secs| *secs > 0) {
        let sweeper = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let removed = sweeper.sweep_expired_quota();
                if removed > 0 {
                    info!("Swept {} expired quota records", removed);
                }
            }
        });
        info!("Quota sweep every {}s", interval_secs);
    }

    let app = api::router(service, config.cors_enabled);

    // Start server
    let addr: SocketAddr = config.server_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
