//! HTTP server wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pipeline::SubmitQueue;
use crate::session::SessionManager;
use crate::store::SharedStore;

use super::handlers;

/// Shared state for all handlers.
pub struct HttpState {
    pub store: SharedStore,
    pub queue: SubmitQueue,
    pub manager: Arc<SessionManager>,
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/send", post(handlers::send_form).get(handlers::send_query))
        .route("/api/messages", get(handlers::list_messages))
        .route("/api/inbound", get(handlers::list_inbound))
        .route("/api/pending", get(handlers::list_pending))
        .route("/api/stats", get(handlers::stats))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .with_state(state)
}

/// Serve until the token is cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<HttpState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("http server stopped");
    Ok(())
}
