//! HTTP and WebSocket routes for Aster server.

use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Json},
    routing::get,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::host::SessionHost;
use crate::protocol::{Request, Response, ResponseError, SessionId, codes, methods};

/// Application state shared across handlers.
pub struct AppState {
    pub host: Arc<SessionHost>,
}

type Sender = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

/// Sessions a connection has opened or addressed; only their notifications
/// are forwarded to it.
type Watched = Arc<Mutex<FxHashSet<SessionId>>>;

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.host.len(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let sender: Sender = Arc::new(tokio::sync::Mutex::new(sender));
    let watched: Watched = Arc::default();

    // Forward notifications for watched sessions
    let mut rx = state.host.subscribe();
    let forward_sender = sender.clone();
    let forward_watched = watched.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    let relevant = notification.session_id.as_ref().is_none_or(|id| {
                        forward_watched
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .contains(id)
                    });
                    if relevant && !send_message(&forward_sender, &notification).await {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("WebSocket client lagged, dropped {} notifications", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Handle incoming requests
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<Request>(&text) {
                Ok(request) => handle_request(request, &state, &sender, &watched),
                Err(e) => {
                    tracing::warn!("Failed to parse request: {} (input: {})", e, text);
                    let response = Response::err(
                        Value::Null,
                        ResponseError {
                            code: codes::PARSE_ERROR,
                            message: format!("Invalid message format: {e}"),
                            data: None,
                        },
                    );
                    send_message(&sender, &response).await;
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    forward_task.abort();
}

/// Dispatch one request on its own task so a long execution never blocks
/// a later `execution/cancel` on the same connection.
fn handle_request(request: Request, state: &Arc<AppState>, sender: &Sender, watched: &Watched) {
    if let Some(id) = &request.session_id {
        watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
    }
    let is_open = request.method == methods::SESSION_OPEN;
    let host = state.host.clone();
    let sender = sender.clone();
    let watched = watched.clone();

    tokio::spawn(async move {
        let response = host.dispatch(request).await;
        if is_open {
            let opened = response
                .result
                .as_ref()
                .and_then(|r| r.get("session_id"))
                .and_then(Value::as_str);
            if let Some(id) = opened {
                watched
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id.to_string());
            }
        }
        send_message(&sender, &response).await;
    });
}

/// Send a message through the WebSocket. Returns `false` once the peer is gone.
async fn send_message(sender: &Sender, msg: &impl Serialize) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let mut sender = sender.lock().await;
            sender.send(Message::Text(json.into())).await.is_ok()
        }
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            true
        }
    }
}
