//! WebSocket gateway — the connection-level protocol.
//!
//! `/ws` upgrades to a long-lived bidirectional channel multiplexing the
//! client message types (new/resume/message/confirm/cancel); `/health`
//! returns a trivial OK body. Engine output is mapped onto a push stream
//! of typed server messages.

pub mod auth;
pub mod connection;
pub mod protocol;
pub mod state;
pub mod ws;

pub use connection::{handle_client_message, ClientConn};
pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use teller_domain::{Error, Result};

/// Build the HTTP router: `/ws` (WebSocket upgrade) and `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Bind and serve the gateway until the process exits.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Other(format!("bind {addr}: {e}")))?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Other(e.to_string()))
}
