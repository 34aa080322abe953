//! HTTP and WebSocket transport.
//!
//! Routes:
//! - `GET /health` answers `{"status":"ok"}`
//! - `GET /` and `GET /ws` upgrade to a relay WebSocket
//! - anything else is a 404
//!
//! Every socket is split into a reader loop and a writer task. The reader
//! turns frames into [`ServerEvent::FrameReceived`]; the writer drains the
//! connection's outbound queue. Whichever half ends first, the connection
//! is reported closed exactly once, from the reader side.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{SharedRelay, driver::ServerEvent};

/// State shared by all handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) relay: SharedRelay,
    pub(crate) queue_depth: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Build the router for a relay.
pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .fallback(not_found)
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.queue_depth.max(1));

    let conn_id = {
        let mut relay = state.relay.lock().await;
        let conn_id = relay.driver.allocate_connection_id();
        relay.executor.register(conn_id, tx);
        if let Err(e) = relay.handle(ServerEvent::ConnectionAccepted { conn_id }) {
            tracing::warn!(conn_id, error = %e, "connection rejected");
            relay.executor.unregister(conn_id);
            return;
        }
        conn_id
    };

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if let Err(e) = sink.send(Message::Text(payload.to_string().into())).await {
                tracing::debug!(conn_id, error = %e, "write failed");
                return;
            }
        }
        // Queue detached: the driver closed this connection.
        if let Err(e) = sink.close().await {
            tracing::debug!(conn_id, error = %e, "close failed");
        }
    });

    let reason = loop {
        tokio::select! {
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!(conn_id, "ignoring non-UTF-8 binary frame");
                            continue;
                        },
                    },
                    Some(Ok(Message::Close(_))) | None => break "client closed",
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(conn_id, error = %e, "read failed");
                        break "read error";
                    },
                };

                let mut relay = state.relay.lock().await;
                if let Err(e) = relay.handle(ServerEvent::FrameReceived { conn_id, text }) {
                    tracing::debug!(conn_id, error = %e, "frame rejected");
                    break "connection no longer open";
                }
            },
            _ = &mut writer => break "writer finished",
        }
    };

    {
        let mut relay = state.relay.lock().await;
        if let Err(e) =
            relay.handle(ServerEvent::ConnectionClosed { conn_id, reason: reason.to_string() })
        {
            tracing::warn!(conn_id, error = %e, "close rejected");
        }
        relay.executor.unregister(conn_id);
    }

    writer.abort();
}
