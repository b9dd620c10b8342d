//! HTTP/WebSocket server layer.
//!
//! One WebSocket connection per player session carries all inbound actions
//! (board, bet) and all outbound game events; a handful of plain HTTP
//! endpoints serve room listings and house stats. The game core never sees
//! axum types: it publishes through the `Broadcaster` trait and this module
//! filters the shared broadcast stream per connection.

use crate::service::GameService;
use crate::transport::{ChannelBroadcaster, Scope};
use crate::types::{Direction, RoomId};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared state handed to every handler.
pub struct AppState {
    pub service: Arc<GameService>,
    pub broadcaster: Arc<ChannelBroadcaster>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .route("/rooms/:id/round", get(round_handler))
        .route("/stats", get(stats_handler))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until ctrl-c / SIGTERM.
pub async fn run_server(
    state: Arc<AppState>,
    listen_address: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);
    let addr = format!("{listen_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn rooms_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.room_list())
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.stats().await)
}

async fn round_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.service.round_snapshot(id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "no trip in progress"})),
        )
            .into_response(),
    }
}

/// Inbound actions a client may send over its WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientAction {
    Board { user_id: String, room_id: RoomId },
    Bet { direction: Direction },
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Client-supplied session id, for reconnects. A fresh one is minted
    /// when absent.
    session: Option<String>,
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let session_id = query
        .session
        .unwrap_or_else(|| format!("ws-{}", Uuid::new_v4()));
    ws.on_upgrade(move |socket| handle_connection(socket, session_id, state))
}

async fn handle_connection(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    info!(session_id, "client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.broadcaster.subscribe();

    let hello = json!({"type": "session", "session_id": session_id});
    if sender.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    // A reconnecting session gets the in-flight round replayed immediately.
    state.service.catch_up(&session_id).await;

    let send_service = Arc::clone(&state.service);
    let send_session = session_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let envelope = match rx.recv().await {
                Ok(envelope) => envelope,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session_id = %send_session, skipped, "slow consumer, events dropped");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            // Per-connection scope filter over the shared stream.
            let mine = match &envelope.scope {
                Scope::Session(s) => *s == send_session,
                Scope::Room(room_id) => send_service.session_room(&send_session) == Some(*room_id),
            };
            if !mine {
                continue;
            }
            let text = match serde_json::to_string(&envelope.event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("event serialization failed: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_service = Arc::clone(&state.service);
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    handle_action(&recv_service, &recv_session, &text).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.service.leave(&session_id);
    info!(session_id, "client disconnected");
}

async fn handle_action(service: &GameService, session_id: &str, raw: &str) {
    let action: ClientAction = match serde_json::from_str(raw) {
        Ok(action) => action,
        Err(e) => {
            debug!(session_id, "unparseable client message: {e}");
            return;
        }
    };
    let result = match action {
        ClientAction::Board { user_id, room_id } => {
            service.board(session_id, &user_id, room_id).await
        }
        ClientAction::Bet { direction } => {
            service.place_bet(session_id, direction).await.map(|_| ())
        }
    };
    if let Err(e) = result {
        debug!(session_id, "action rejected: {e}");
        // Rejections go back on the session scope so only the caller sees
        // them; the payload reuses the stable error codes.
        service.notify_rejection(session_id, &e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_action_parsing() {
        let raw = r#"{"action":"bet","direction":"long"}"#;
        let action: ClientAction = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            action,
            ClientAction::Bet {
                direction: Direction::Long
            }
        ));

        let raw = format!(
            r#"{{"action":"board","user_id":"alice","room_id":"{}"}}"#,
            Uuid::nil()
        );
        let action: ClientAction = serde_json::from_str(&raw).unwrap();
        assert!(matches!(action, ClientAction::Board { .. }));
    }
}
