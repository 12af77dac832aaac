//! WebSocket transport for the relay.
//!
//! One socket maps to one [`Session`]. Inbound text frames are parsed into
//! [`InboundEvent`]s and handled in order; a writer task drains the
//! connection's outbound queue back onto the socket.

use crate::chat::events::{InboundEvent, OutboundEvent};
use crate::chat::lifecycle::Session;
use crate::core::config::AppState;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Default, Deserialize)]
pub struct WsConnectParams {
    pub token: Option<String>,
}

/// GET /ws[?token=...]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsConnectParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(state.config.outbox_capacity);

    let mut session = Session::new(state, tx, token);
    let connection = session.id();
    info!(connection = %connection, "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to serialize outbound event: {}", e);
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<InboundEvent>(text.as_str()) {
                Ok(event) => session.handle(event).await,
                Err(e) => {
                    debug!(connection = %connection, "malformed frame: {}", e);
                    session
                        .reject_malformed(format!("malformed event: {}", e))
                        .await;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection, "websocket error: {}", e);
                break;
            }
        }
    }

    session.close().await;
    drop(session);
    writer.abort();
    info!(connection = %connection, "websocket disconnected");
}
