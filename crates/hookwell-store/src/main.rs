//! hookwell store service binary
//!
//! Connects to the database, runs migrations, starts the maintenance jobs
//! and serves the capture/lookup surface until a shutdown signal arrives.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookwell_store::{build_router, jobs, AppState, StoreConfig};

/// hookwell store - capture persistence, quota and endpoint lookup
#[derive(Parser, Debug)]
#[command(name = "hookwell-store")]
#[command(about = "Run the hookwell store service", long_about = None)]
struct ServerArgs {
    /// Database URL (PostgreSQL in production, SQLite for development)
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://./hookwell.db?mode=rwc"
    )]
    database_url: String,

    /// Listen port
    #[arg(long, env = "STORE_PORT", default_value = "3210")]
    port: u16,

    /// Bearer secret required by the receiver; capture routes fail closed
    /// when unset
    #[arg(long, env = "CAPTURE_SHARED_SECRET")]
    capture_shared_secret: Option<String>,

    /// Free-tier request cap per billing period
    #[arg(long, env = "FREE_REQUEST_LIMIT", default_value = "500")]
    free_request_limit: i64,

    /// Pro-tier request cap per billing period
    #[arg(long, env = "PRO_REQUEST_LIMIT", default_value = "500000")]
    pro_request_limit: i64,

    /// Lifetime applied to ephemeral endpoints on creation
    #[arg(long, env = "EPHEMERAL_TTL_MS", default_value = "600000")]
    ephemeral_ttl_ms: i64,

    /// Billing period length applied on pro rollover
    #[arg(long, env = "BILLING_PERIOD_MS", default_value = "2592000000")]
    billing_period_ms: i64,

    /// Seconds between expired-endpoint cleanup passes
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "60")]
    cleanup_interval_secs: u64,

    /// Seconds between billing period reset passes
    #[arg(long, env = "PERIOD_RESET_INTERVAL_SECS", default_value = "60")]
    period_reset_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_logging(&args.log_level)?;

    if args.capture_shared_secret.is_none() {
        warn!("CAPTURE_SHARED_SECRET is unset; capture and lookup routes will refuse all requests");
    }

    let db = hookwell_store_db::connect(&args.database_url).await?;
    hookwell_store_db::migrate(&db).await?;

    let config = StoreConfig {
        capture_shared_secret: args.capture_shared_secret,
        free_request_limit: args.free_request_limit,
        pro_request_limit: args.pro_request_limit,
        ephemeral_ttl_ms: args.ephemeral_ttl_ms,
        billing_period_ms: args.billing_period_ms,
    };
    let state = AppState::new(db.clone(), config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup_handle = jobs::spawn_cleanup(
        db.clone(),
        Duration::from_secs(args.cleanup_interval_secs),
        shutdown_rx.clone(),
    );
    let period_reset_handle = jobs::spawn_period_reset(
        db,
        args.free_request_limit,
        args.pro_request_limit,
        args.billing_period_ms,
        Duration::from_secs(args.period_reset_interval_secs),
        shutdown_rx,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Store listening on {}", addr);
    info!("OpenAPI spec: http://{}/api/openapi.json", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, stopping maintenance jobs...");
    let _ = shutdown_tx.send(true);
    let _ = cleanup_handle.await;
    let _ = period_reset_handle.await;
    info!("Store stopped");

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
