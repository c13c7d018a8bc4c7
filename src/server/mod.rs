//! Local orchestrator server.
//!
//! Serves the ensemble event stream over a WebSocket endpoint and runs the
//! six-stage analysis pipeline when a client requests one. Events are
//! fanned out to every connected client through a broadcast channel; a
//! client that connects mid-run simply sees the remainder of the stream.

pub mod pipeline;
pub mod results;
pub mod ws;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config;
use crate::protocol::ServerEvent;

/// Broadcast capacity; a full pipeline run is ~50 events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the orchestrator server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Delay between scripted pipeline emissions. Zero makes a run
    /// instantaneous, which tests rely on.
    pub pace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: config::DEFAULT_HOST.to_string(),
            port: config::DEFAULT_PORT,
            pace: Duration::from_millis(config::DEFAULT_PACE_MS),
        }
    }
}

/// Serialize-once fan-out of [`ServerEvent`]s to all connected sockets.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<String>,
}

impl EventSink {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    /// Serialize and broadcast an event. Returns silently when no clients
    /// are connected.
    pub fn emit(&self, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(err) => {
                error!(error = %err, event_type = event.type_name(), "failed to serialize event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

/// Shared state behind the router.
pub struct ServerState {
    pub sink: EventSink,
    /// Set while a pipeline run is in flight; one run at a time.
    pub running: AtomicBool,
    pub pace: Duration,
}

impl ServerState {
    pub fn new(pace: Duration) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sink: EventSink::new(tx),
            running: AtomicBool::new(false),
            pace,
        }
    }
}

/// Build the application router: health probe plus the event stream socket.
/// The socket is served at both `/` (the historical default address) and
/// `/ws`.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Bind and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = Arc::new(ServerState::new(config.pace));
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "orchestrator listening; clients connect to ws://{local_addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("shutting down");
}
