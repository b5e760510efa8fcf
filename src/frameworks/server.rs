// Framework bootstrap for the sync server runtime.

use std::io::Result;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::{routing::get, BoxError, Router};
use tower::{timeout::TimeoutLayer, ServiceBuilder};

use crate::frameworks::config;
use crate::interface_adapters::net::ws_handler;
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::sync::SyncService;
use crate::use_cases::{RoomRegistry, SessionRegistry};

pub fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state();

    let app = Router::new()
        .route("/sync", get(ws_handler))
        // Bound the handshake: the timeout covers the request up to the
        // upgrade response. The hijacked connection afterwards is out of
        // this service's hands and runs against the read-idle deadline.
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handshake_timeout))
                .layer(TimeoutLayer::new(config::HANDSHAKE_TIMEOUT)),
        )
        .with_state(state);

    tracing::info!(%address, "listening");

    // Serve until shutdown; existing connections drain through their own
    // disconnect path once the socket closes under them.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, "server error");
        })
}

/// Binds the configured port and serves. An explicit port (the CLI
/// argument) wins over the environment.
pub async fn run_with_config(port_override: Option<u16>) -> Result<()> {
    init_runtime();

    let port = port_override.unwrap_or_else(config::port);
    let address = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}

fn build_state() -> Arc<AppState> {
    let sessions = Arc::new(SessionRegistry::new());
    let rooms = Arc::new(RoomRegistry::new());
    let sync = SyncService::new(sessions.clone(), rooms);

    Arc::new(AppState { sessions, sync })
}

async fn handshake_timeout(_err: BoxError) -> StatusCode {
    StatusCode::REQUEST_TIMEOUT
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
