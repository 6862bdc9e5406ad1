//! The WebSocket transport: parses inbound text frames as [`ClientEnvelope`]
//! and writes [`ServerEnvelope`] back out, one task per connection. All the
//! actual protocol logic lives in [`chat_core::Session`]; this module is
//! just the wire.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chat_core::session::OUTBOUND_CAPACITY;
use chat_core::Session;
use chat_proto::{ClientEnvelope, ServerEnvelope};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEnvelope>(OUTBOUND_CAPACITY);
    let mut session = Session::new(state.hub.clone(), state.store.clone(), outbound_tx.clone());
    let conn_id = uuid::Uuid::new_v4();
    state.logger.log(format!("connection {conn_id} opened"));

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEnvelope>(&text) {
                            Ok(env) => {
                                for reply in session.dispatch(env).await {
                                    if outbound_tx.send(reply).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(err) => debug!(error = %err, "dropping malformed client envelope"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "websocket read error");
                        break;
                    }
                }
            }
            outgoing = outbound_rx.recv() => {
                let Some(env) = outgoing else { break };
                let Ok(text) = serde_json::to_string(&env) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    state.logger.log(format!("connection {conn_id} closed"));
}
