//! HTTP surface: static UI, SSE event stream, JSON APIs, cached audio.

pub mod error;
pub mod routes;
pub mod state;
pub mod ui;

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use state::{Broadcaster, Event, ServerState, EVENT_CLOUD, EVENT_CLOUD_PULSE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub read_header_timeout: Duration,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/app.js", get(routes::app_js))
        .route("/events", get(routes::sse))
        .route("/api/events", get(routes::api_events))
        .route("/api/cloud", get(routes::api_cloud))
        .route("/api/cues", get(routes::api_cues))
        .route("/api/speak", get(routes::api_speak))
        .route("/audio/:name", get(routes::audio))
        .route("/healthz", get(routes::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown signal flips; in-flight connections
/// get a graceful close.
// TODO: wire cfg.read_header_timeout through hyper's
// http1::Builder::header_read_timeout instead of relying on defaults.
pub async fn serve(
    cfg: ServerConfig,
    state: ServerState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = cfg.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}
