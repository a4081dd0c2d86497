use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    state::AppState,
    websocket::types::{ClientMessage, WsMessage},
};

#[derive(Debug, Deserialize)]
pub struct WsConnectQuery {
    pub user_id: Uuid,
}

/// WebSocket upgrade handler. Token verification happens upstream; here the
/// connecting user only has to exist and be active.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsConnectQuery>,
) -> Result<Response> {
    let user = state
        .user_repository
        .find_by_id(query.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !user.is_active {
        return Err(AppError::Forbidden("User is deactivated".to_string()));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user.id, user.username, state)))
}

/// Handle one WebSocket connection. Presence flips online on the user's
/// first connection and offline only when the last one closes.
async fn handle_socket(socket: WebSocket, user_id: Uuid, username: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection_id = Uuid::new_v4();

    let connections = state.ws_connections.add_connection(user_id, connection_id, tx);
    if connections == 1 {
        state.presence.set_user_online(user_id, &username);
    }

    // Pump channel messages out to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Ping) => {}
                        Err(e) => {
                            tracing::debug!("Ignoring malformed client message: {}", e);
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let remaining = state.ws_connections.remove_connection(user_id, connection_id);
    if remaining == 0 {
        state.presence.set_user_offline(user_id);
    }

    tracing::info!("WebSocket connection closed for user {}", user_id);
}
