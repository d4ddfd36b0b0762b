//! The reconnecting relay client.

use crate::policy::{ClientConfig, ReconnectPolicy};
use empath_core::{
    message::InboundMessage,
    protocol::{ClientEvent, ServerEvent},
};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Observable state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// Reconnection attempts are exhausted; only an explicit `connect` leaves this state.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Named events delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connect,
    Disconnect,
    ConnectError(String),
    /// Content of a `response` event.
    Response(String),
    /// Message of an `error` event.
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is {0}, not connected")]
    NotConnected(ConnectionState),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel driver has stopped")]
    Closed,
}

enum Command {
    Connect,
    Send(String),
    Close,
}

enum PumpExit {
    /// The server went away or the socket failed.
    Lost,
    /// `close()` was called.
    Closed,
    /// Every `RelayClient` handle was dropped.
    Shutdown,
}

/// A WebSocket client for the relay that reconnects on its own.
///
/// Must be created inside a Tokio runtime. The connection is not opened until
/// [`connect`](Self::connect) is called, so subscribers registered before that
/// see the first `Connect` event.
pub struct RelayClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ChannelEvent>,
    driver: JoinHandle<()>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);

        let driver = Driver {
            url: config.url,
            policy: config.reconnect,
            commands: commands_rx,
            state: state_tx,
            events: events.clone(),
        };
        let driver = tokio::spawn(driver.run());

        Self {
            commands,
            state,
            events,
            driver,
        }
    }

    /// Subscribes to lifecycle and reply events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the channel reaches `target`.
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), ChannelError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ChannelError::Closed)
    }

    /// Opens the connection, or starts a fresh attempt cycle after an `Error`.
    pub fn connect(&self) -> Result<(), ChannelError> {
        self.commands
            .send(Command::Connect)
            .map_err(|_| ChannelError::Closed)
    }

    /// Closes the connection without reconnecting.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.commands
            .send(Command::Close)
            .map_err(|_| ChannelError::Closed)
    }

    /// Emits a `message` event for a user message.
    pub fn send(&self, message: &InboundMessage) -> Result<(), ChannelError> {
        self.emit(&ClientEvent::from(message))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.send(&InboundMessage::Text(text.into()))
    }

    /// Emits an arbitrary client event. Refused unless connected.
    pub fn emit(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ChannelError::NotConnected(state));
        }
        let frame = serde_json::to_string(event)?;
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| ChannelError::Closed)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Owns the socket and runs the connection state machine.
struct Driver {
    url: String,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ChannelEvent>,
}

impl Driver {
    async fn run(mut self) {
        // Parked until asked to connect.
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Connect => {
                    if !self.connect_cycle().await {
                        break;
                    }
                }
                Command::Send(_) => warn!("Dropping event sent while not connected"),
                Command::Close => {}
            }
        }
        debug!("Relay client driver stopped");
    }

    /// Connects and stays connected, reconnecting per the policy.
    ///
    /// Returns `false` when the client handle is gone and the driver should stop.
    async fn connect_cycle(&mut self) -> bool {
        let mut retries = 0u32;
        let mut first = true;

        loop {
            if !first {
                if !self.policy.should_retry(retries) {
                    warn!(retries, "Reconnection attempts exhausted");
                    self.set_state(ConnectionState::Error);
                    return true;
                }
                retries += 1;
                match self.wait_before_retry().await {
                    Some(true) => {}
                    Some(false) => {
                        self.set_state(ConnectionState::Disconnected);
                        return true;
                    }
                    None => return false,
                }
            }
            first = false;

            self.set_state(ConnectionState::Connecting);
            let ws = match self.try_connect().await {
                Ok(ws) => ws,
                Err(message) => {
                    warn!(attempt = retries, error = %message, "Connection attempt failed");
                    self.emit(ChannelEvent::ConnectError(message));
                    continue;
                }
            };

            retries = 0;
            info!(url = %self.url, "Connected to relay");
            self.set_state(ConnectionState::Connected);
            self.emit(ChannelEvent::Connect);

            let exit = self.pump(ws).await;
            self.set_state(ConnectionState::Disconnected);
            self.emit(ChannelEvent::Disconnect);
            match exit {
                PumpExit::Lost => info!("Connection to relay lost"),
                PumpExit::Closed => return true,
                PumpExit::Shutdown => return false,
            }
        }
    }

    async fn try_connect(&self) -> Result<WsStream, String> {
        match timeout(self.policy.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _))) => Ok(ws),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timeout".to_string()),
        }
    }

    /// Sleeps for the retry delay while still serving commands.
    ///
    /// `Some(true)` to retry, `Some(false)` if closed, `None` if the handle is gone.
    async fn wait_before_retry(&mut self) -> Option<bool> {
        let delay = sleep(self.policy.delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return Some(true),
                command = self.commands.recv() => match command {
                    Some(Command::Close) => return Some(false),
                    Some(Command::Send(_)) => warn!("Dropping event sent while reconnecting"),
                    Some(Command::Connect) => {}
                    None => return None,
                },
            }
        }
    }

    async fn pump(&mut self, ws: WsStream) -> PumpExit {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            warn!(error = %e, "Failed to send to relay");
                            return PumpExit::Lost;
                        }
                    }
                    Some(Command::Connect) => {}
                    Some(Command::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        return PumpExit::Closed;
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return PumpExit::Shutdown;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_text(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => return PumpExit::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Relay socket failed");
                        return PumpExit::Lost;
                    }
                },
            }
        }
    }

    fn on_text(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(ServerEvent::Response(payload)) => self.emit(ChannelEvent::Response(payload.content)),
            Ok(ServerEvent::Error(payload)) => self.emit(ChannelEvent::Error(payload.message)),
            Err(e) => warn!(error = %e, "Ignoring unknown server frame"),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
