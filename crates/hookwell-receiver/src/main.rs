//! hookwell edge receiver binary
//!
//! Serves the capture surface until a shutdown signal arrives, then
//! flushes pending batches with a bounded wait before exiting.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookwell_receiver::{
    batcher::SHUTDOWN_TIMEOUT, build_router, store_client::StoreClient, ReceiverState,
};

/// hookwell receiver - webhook ingest edge
#[derive(Parser, Debug)]
#[command(name = "hookwell-receiver")]
#[command(about = "Run the hookwell edge receiver", long_about = None)]
struct ServerArgs {
    /// Store base URL for /capture-batch, /quota and /endpoint-info
    #[arg(long, env = "STORE_SITE_URL")]
    store_site_url: String,

    /// Bearer secret shared with the store
    #[arg(long, env = "CAPTURE_SHARED_SECRET")]
    capture_shared_secret: Option<String>,

    /// Listen port
    #[arg(long, env = "PORT", default_value = "3001")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_logging(&args.log_level)?;

    reqwest::Url::parse(&args.store_site_url)
        .with_context(|| format!("STORE_SITE_URL is not a valid URL: {}", args.store_site_url))?;

    let client = Arc::new(StoreClient::new(
        &args.store_site_url,
        args.capture_shared_secret.clone(),
    )?);
    let state = ReceiverState::new(client, args.capture_shared_secret);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Webhook receiver listening on {}", addr);

    axum::serve(
        listener,
        build_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown signal received, flushing pending requests...");
    state.batcher.flush_all();
    if state.batcher.wait_idle(SHUTDOWN_TIMEOUT).await {
        info!("All pending captures flushed");
    } else {
        warn!("Shutdown timeout exceeded, some captures may be lost");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!("Error listening for shutdown signal: {}", error);
        }
    };

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                warn!("Error installing SIGTERM handler: {}", error);
                ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
