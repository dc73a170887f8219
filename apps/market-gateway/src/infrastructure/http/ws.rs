//! Downstream WebSocket endpoint.
//!
//! Each connection registers with the broadcast hub, whose queue already
//! holds the snapshot. A writer task drains the queue into the socket while
//! the reader answers `get_candles` queries through the same queue.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::GatewayState;
use crate::application::ports::UpstreamPort;
use crate::infrastructure::broadcast::{ClientMessage, ServerMessage, SubscriberId};
use crate::infrastructure::metrics;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let subscription = state.hub.subscribe(&state.cache, state.session.is_live());
    let id = subscription.id;
    let reply_tx = subscription.sender;
    let mut queue = subscription.receiver;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = queue.recv().await {
            if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&state, id, &reply_tx, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(subscriber = %id, error = %e, "Downstream socket error");
                    break;
                }
            },
        }
    }

    state.hub.unsubscribe(id);
    send_task.abort();
}

/// Answer one client message. Malformed messages are ignored.
fn handle_client_message(
    state: &GatewayState,
    id: SubscriberId,
    reply_tx: &mpsc::Sender<Arc<str>>,
    text: &str,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(subscriber = %id, error = %e, "Ignoring malformed client message");
            return;
        }
    };

    let reply = match message {
        ClientMessage::GetCandles { asset } => {
            let data = state.cache.read().candles(&asset).map(<[_]>::to_vec);
            ServerMessage::Candles {
                asset,
                data,
                price: None,
            }
        }
    };

    match reply.to_text() {
        Ok(text) => {
            if reply_tx.try_send(text).is_ok() {
                metrics::record_downstream_message(reply.kind());
            } else {
                metrics::record_downstream_dropped(reply.kind());
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
    }
}
