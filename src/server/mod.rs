//! HTTP server
//!
//! Builds the axum router for the relay surface and runs the accept loop.
//! The UI pages and assets are served straight from the static directory;
//! everything stateful goes through the handlers in [`handlers`].

pub mod handlers;
pub mod multipart;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::relay::ConnectionManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub config: Arc<RelayConfig>,
}

/// Assemble the relay's HTTP surface.
pub fn router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    Router::new()
        .route("/register", get(handlers::register))
        .route("/watch", get(handlers::watch))
        .route("/stream", post(handlers::publish))
        .route_service("/streamui", ServeFile::new(static_dir.join("stream.html")))
        .route_service("/watchui", ServeFile::new(static_dir.join("watch.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
}

/// Bind the configured port and serve until the listener fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.http_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "relay listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
