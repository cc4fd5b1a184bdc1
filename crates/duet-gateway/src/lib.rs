//! # duet-gateway
//!
//! WebSocket transport for Duet. Each socket is one broker connection:
//! - Client frames are decoded and dispatched to the broker
//! - Broker events are drained from the connection's outbound queue
//! - Request errors are reported on the same socket as `error` events
//!
//! Closing the socket (or being evicted for a full outbound queue) ends the
//! connection and tears down whatever it was part of.

pub mod protocol;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use duet_broker::{Broker, BrokerError, ConnectionHandle};
use duet_common::id::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, ProtocolError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Gateway state.
#[derive(Clone)]
pub struct GatewayState {
    pub broker: Broker,
    /// Largest accepted client frame, in bytes.
    pub max_frame_bytes: usize,
}

impl GatewayState {
    pub fn new(broker: Broker, max_frame_bytes: usize) -> Self {
        Self {
            broker,
            max_frame_bytes,
        }
    }
}

/// Build the signaling WebSocket router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sender, mut receiver) = socket.split();
    let ConnectionHandle { id, mut inbox } = state.broker.register().await;

    // Direct-send channel: receive loop → sender task (error replies)
    let (direct_tx, mut direct_rx) = mpsc::channel::<String>(16);

    tracing::info!(connection = %id, "Client connected to gateway");

    // ── Sender task ──────────────────────────────────────────────────────────
    // Merges broker events and direct replies onto the single WebSocket sender.
    // The broker closes `inbox` when it drops the connection.
    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => match protocol::encode(&event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(connection = %id, error = %e, "Failed to encode event");
                            continue;
                        }
                    },
                    None => break,
                },
                Some(frame) = direct_rx.recv() => frame,
            };

            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // ── Receive loop ─────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            msg = receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(connection = %id, error = %e, "WebSocket read failed");
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => handle_text(&state, id, text.as_str(), &direct_tx).await,
                    Message::Binary(_) => {
                        reply(&direct_tx, id, protocol::encode_protocol_error(&ProtocolError::BinaryFrame));
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            // Writer stopped: evicted by the broker or the socket is gone.
            _ = &mut send_task => break,
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────
    state.broker.unregister(id).await;
    send_task.abort();
    tracing::info!(connection = %id, "Client disconnected from gateway");
}

async fn handle_text(
    state: &GatewayState,
    id: ConnectionId,
    text: &str,
    direct_tx: &mpsc::Sender<String>,
) {
    let message = match protocol::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(connection = %id, error = %e, "Rejected client frame");
            reply(direct_tx, id, protocol::encode_protocol_error(&e));
            return;
        }
    };

    let broker = &state.broker;
    let result = match message {
        ClientMessage::FindMatch => broker.find_match(id).await,
        ClientMessage::Next => broker.next(id).await,
        ClientMessage::Cancel => broker.cancel(id).await,
        ClientMessage::Leave => broker.leave(id).await,
        ClientMessage::Signal(signal) => broker.relay(id, signal).await.map(|_| ()),
    };

    match result {
        Ok(()) => {}
        Err(BrokerError::UnknownConnection) => {
            // Already evicted; the writer is on its way out.
        }
        Err(e) => {
            if e.is_idempotent_noop() {
                tracing::trace!(connection = %id, error = %e, "Repeated request ignored");
            } else {
                tracing::debug!(connection = %id, error = %e, "Request rejected");
            }
            reply(direct_tx, id, protocol::encode_broker_error(&e));
        }
    }
}

/// Queue a direct reply. Dropped if the client is not reading.
fn reply(direct_tx: &mpsc::Sender<String>, id: ConnectionId, frame: String) {
    if direct_tx.try_send(frame).is_err() {
        tracing::warn!(connection = %id, "Dropped error reply; client is not reading");
    }
}
