//! Manages the WebSocket connection lifecycle for a relay session.

use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use empath_core::{
    dispatcher::Dispatcher,
    protocol::{ClientEvent, ServerEvent},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let max_message_bytes = state.config.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection relay state.
///
/// `on_frame` is the single entry point for inbound frames; it returns the
/// event to emit, if any.
pub struct RelaySession {
    id: Uuid,
    dispatcher: Arc<Dispatcher>,
    handled: u64,
}

impl RelaySession {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispatcher,
            handled: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of `message` events answered so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Processes one text frame to completion.
    ///
    /// Returns `None` for frames that are not a `message` event; those never
    /// get a reply.
    pub async fn on_frame(&mut self, text: &str) -> Option<ServerEvent> {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring frame that is not a known client event");
                return None;
            }
        };

        match event {
            ClientEvent::Message(data) => {
                debug!(kind = ?data.get("type"), "Received message");
                let result = self.dispatcher.handle(&data).await;
                self.handled += 1;
                Some(result.into())
            }
        }
    }
}

/// Main handler for an individual WebSocket connection.
///
/// Frames are processed strictly one after another, so replies leave in the
/// order their requests arrived.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut session = RelaySession::new(state.dispatcher.clone());
    tracing::Span::current().record("session_id", &session.id().to_string());
    info!("Client connected");

    let (mut socket_tx, mut socket_rx) = socket.split();

    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if let Some(event) = session.on_frame(text.as_str()).await {
                    // The client may have left while the providers were working.
                    if let Err(e) = send_event(&mut socket_tx, &event).await {
                        debug!(error = ?e, event = event.name(), "Dropping reply for closed connection");
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                warn!(bytes = data.len(), "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close frame.");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                warn!(error = ?e, "Error receiving from client WebSocket");
                break;
            }
        }
    }

    info!(handled = session.handled(), "Client disconnected");
}

/// A helper function to serialize and send a `ServerEvent` to the client.
pub(crate) async fn send_event(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let serialized = serde_json::to_string(event)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
