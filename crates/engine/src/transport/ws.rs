// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport for dashboard realtime subscriptions.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast;

use crate::realtime::RealtimeMessage;
use crate::state::EngineState;

/// `GET /ws/{session_id}` — upgrade and subscribe to `session:{id}`.
pub async fn ws_handler(
    State(state): State<Arc<EngineState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let group = format!("session:{session_id}");
    let rx = state.realtime.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, rx, group))
}

/// Per-connection handler: forward every message whose group matches this
/// socket's session, ignoring the rest. Never reads from the client beyond
/// detecting its close — the dashboard channel is one-way.
async fn handle_ws(mut socket: WebSocket, mut rx: broadcast::Receiver<RealtimeMessage>, group: String) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(message) if message.group() == group => {
                        let Ok(json) = serde_json::to_string(&message) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
