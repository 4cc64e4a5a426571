//! WebSocket endpoint.
//!
//! Flow:
//! 1. Client connects to `/ws?token=<credential>`; the validator derives
//!    the user id before anything else runs.
//! 2. Reader loop parses client messages and dispatches them serially.
//! 3. A writer task forwards outbound server messages to the socket.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection::{handle_client_message, ClientConn};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Transport credential; validated before the upgrade completes.
    pub token: Option<String>,
}

/// GET /ws — upgrade to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.as_deref().unwrap_or("");
    let user_id = match state.auth.validate(token) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "websocket auth failed");
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing token",
            )
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    tracing::info!(user_id = %user_id, "client connected");

    // Writer task: forwards outbound server messages to the socket.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "server message serialization failed");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: one message at a time; runs on this session never
    // overlap.
    let mut conn = ClientConn::new(user_id);
    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(&state, &mut conn, msg, &out_tx).await,
                Err(e) => {
                    tracing::debug!(error = %e, "unparseable client message");
                    let _ = out_tx.send(ServerMessage::Error {
                        content: "unrecognized message".to_string(),
                    });
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // axum answers WS-level pings automatically.
            }
            _ => {}
        }
    }

    // The in-memory session dies with the connection; the conversation
    // persists in the store.
    writer.abort();
    tracing::info!(user_id = %conn.user_id, "client disconnected");
}
