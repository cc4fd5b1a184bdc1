//! # Duet Server
//!
//! Main binary for Duet. Serves from a single listener:
//! - WebSocket signaling gateway (`/ws`)
//! - HTTP routes (`/health`, `/api/hello`, `/api/stats`)

mod routes;

use axum::Router;
use clap::Parser;
use duet_broker::{Broker, BrokerSettings, sweeper};
use duet_common::error::DuetResult;
use duet_gateway::GatewayState;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Anonymous one-to-one matchmaking and WebRTC signaling relay.
#[derive(Debug, Parser)]
#[command(name = "duet", version, about)]
struct Cli {
    /// Config file path, without extension.
    #[arg(long, env = "DUET_CONFIG", default_value = "config")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = duet_common::config::init(&cli.config)?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duet=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("Starting Duet v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(environment = ?config.server.environment, "Configuration loaded");

    // === Broker ===
    let broker = Broker::new(BrokerSettings::from_config(config));
    let _sweeper = sweeper::spawn_wait_sweeper(
        broker.clone(),
        Duration::from_secs(config.matchmaking.wait_timeout_secs),
        Duration::from_secs(config.matchmaking.sweep_interval_secs),
    );

    // === Routers ===
    let gateway_router = duet_gateway::build_router(GatewayState::new(
        broker.clone(),
        config.limits.max_frame_bytes,
    ));
    let http_router = routes::build_router(routes::AppState {
        broker,
        started_at: Instant::now(),
    });

    let origin = config.frontend_origin();
    match origin {
        Some(origin) => tracing::info!(origin, "CORS restricted to frontend origin"),
        None => tracing::warn!("No frontend origin configured; CORS allows any origin"),
    }
    let app = routes::app(http_router, gateway_router, routes::cors_layer(origin)?);

    let addr = config.server.socket_addr()?;
    serve(addr, app).await?;

    Ok(())
}

/// Bind `addr` and serve until the listener fails.
async fn serve(addr: SocketAddr, app: Router) -> DuetResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr} (signaling at ws://{addr}/ws)");
    axum::serve(listener, app).await?;
    Ok(())
}
