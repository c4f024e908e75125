//! Owns the raw WebSocket: lifecycle, sends, heartbeat, liveness.
//!
//! The transport does no protocol work beyond framing: JSON text frames and
//! binary PCM frames go up as [`TransportEvent`]s for the session loop to
//! interpret. Socket-level failures are reported as events, never thrown
//! across the read loop; only the caller's own operations (connect, send)
//! return errors directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use confab_realtime_types::{CLOSE_NORMAL, CLOSE_STALE_HEARTBEAT, ClientEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("binary frames are not supported by this connection")]
    BinaryUnsupported,
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode client event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Lifecycle of the one socket the transport owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// What the read loop hands up to the session loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket opened.
    Opened,
    /// A JSON text frame, still unparsed.
    Text(String),
    /// A raw binary frame (PCM16 audio, no envelope).
    Binary(Bytes),
    /// The socket closed; socket-level errors also land here, with no code.
    Closed { code: Option<u16>, reason: String },
}

/// Heartbeat liveness state. Any inbound frame confirms the connection, not
/// only a pong.
#[derive(Debug, Default)]
struct Heartbeat {
    awaiting_frame: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum HeartbeatTick {
    /// Send a ping and wait for traffic.
    Ping,
    /// Nothing arrived since the last ping: the connection is stale.
    Stale,
}

impl Heartbeat {
    fn on_tick(&mut self) -> HeartbeatTick {
        if self.awaiting_frame {
            HeartbeatTick::Stale
        } else {
            self.awaiting_frame = true;
            HeartbeatTick::Ping
        }
    }

    fn on_frame(&mut self) {
        self.awaiting_frame = false;
    }
}

pub struct Transport {
    state: Arc<AtomicU8>,
    sink: Arc<Mutex<Option<WsSink>>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    buffered: Arc<AtomicUsize>,
    ping_interval: Option<Duration>,
    connect_timeout: Duration,
    binary_audio: bool,
}

impl Transport {
    pub fn new(config: &SessionConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
            sink: Arc::new(Mutex::new(None)),
            reader: parking_lot::Mutex::new(None),
            events,
            buffered: Arc::new(AtomicUsize::new(0)),
            ping_interval: config.ping_interval,
            connect_timeout: config.connect_timeout,
            binary_audio: config.binary_audio,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Payload bytes handed to the socket but not yet flushed. Zero while
    /// nothing is mid-send; audio producers can poll this to pace themselves.
    pub fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    /// Flags the transport as mid-reconnection. Set by the session while a
    /// reconnection cycle runs; `connect` overwrites it on success.
    pub(crate) fn mark_reconnecting(&self) {
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Opens the socket, disconnecting any prior one first, and spawns the
    /// read loop (which owns the heartbeat).
    pub async fn connect(&self, request: Request) -> Result<(), TransportError> {
        self.disconnect(CLOSE_NORMAL, "superseded by a new connection")
            .await;
        self.set_state(ConnectionState::Connecting);

        let attempt = connect_async(request);
        let (stream, _response) = match time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(TransportError::WebSocket(e));
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(TransportError::ConnectTimeout(self.connect_timeout));
            }
        };

        let (sink_half, stream_half) = stream.split();
        *self.sink.lock().await = Some(sink_half);
        self.set_state(ConnectionState::Connected);
        let _ = self.events.send(TransportEvent::Opened);

        let handle = tokio::spawn(read_loop(
            stream_half,
            self.sink.clone(),
            self.events.clone(),
            self.ping_interval,
            self.state.clone(),
        ));
        *self.reader.lock() = Some(handle);
        info!("Transport connected");
        Ok(())
    }

    /// Serializes and sends one client event as a JSON text frame.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), TransportError> {
        let text = serde_json::to_string(event)?;
        self.send_text(text).await
    }

    /// Sends a text frame. Errors unless the transport is Connected: a send
    /// on a non-open socket is a local error, never a silent drop.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let len = text.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        let result = async {
            let mut guard = self.sink.lock().await;
            let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
            sink.send(Message::Text(text.into())).await?;
            Ok(())
        }
        .await;
        self.buffered.fetch_sub(len, Ordering::SeqCst);
        result
    }

    /// Sends a raw binary frame (PCM16 audio). Requires the negotiated
    /// binary mode in addition to an open socket.
    pub async fn send_binary(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.binary_audio {
            return Err(TransportError::BinaryUnsupported);
        }
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let len = data.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        let result = async {
            let mut guard = self.sink.lock().await;
            let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
            sink.send(Message::Binary(data)).await?;
            Ok(())
        }
        .await;
        self.buffered.fetch_sub(len, Ordering::SeqCst);
        result
    }

    /// Stops the heartbeat, detaches the read loop, and closes the socket.
    /// Idempotent; emits nothing (caller-initiated closes are reported by
    /// the caller, not the transport).
    pub async fn disconnect(&self, code: u16, reason: &str) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            let _ = sink.close().await;
            debug!(code, reason, "Transport disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Waits for the next heartbeat tick, or forever if the heartbeat is off.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    sink: Arc<Mutex<Option<WsSink>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    ping_interval: Option<Duration>,
    state: Arc<AtomicU8>,
) {
    let mut heartbeat = Heartbeat::default();
    let mut ticker = ping_interval.map(|interval| {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    let (code, reason) = loop {
        tokio::select! {
            _ = next_tick(&mut ticker), if ticker.is_some() => {
                match heartbeat.on_tick() {
                    HeartbeatTick::Ping => {
                        if let Ok(ping) = serde_json::to_string(&ClientEvent::Ping) {
                            let mut guard = sink.lock().await;
                            if let Some(sink) = guard.as_mut() {
                                if let Err(e) = sink.send(Message::Text(ping.into())).await {
                                    warn!(error = %e, "Heartbeat ping failed");
                                }
                            }
                        }
                    }
                    HeartbeatTick::Stale => {
                        // Liveness timeout, not a protocol error: force-close
                        // with the reserved code so the session can tell.
                        warn!("No inbound frame since the last ping; closing stale connection");
                        let mut guard = sink.lock().await;
                        if let Some(mut sink) = guard.take() {
                            let frame = CloseFrame {
                                code: CloseCode::from(CLOSE_STALE_HEARTBEAT),
                                reason: "stale connection".into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                            let _ = sink.close().await;
                        }
                        break (Some(CLOSE_STALE_HEARTBEAT), "stale connection".to_string());
                    }
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(message)) => {
                    heartbeat.on_frame();
                    match message {
                        Message::Text(text) => {
                            let _ = events.send(TransportEvent::Text(text.to_string()));
                        }
                        Message::Binary(data) => {
                            let _ = events.send(TransportEvent::Binary(data));
                        }
                        Message::Close(frame) => {
                            let (code, reason) = match frame {
                                Some(frame) => {
                                    (Some(u16::from(frame.code)), frame.reason.to_string())
                                }
                                None => (None, String::new()),
                            };
                            break (code, reason);
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read error");
                    break (None, e.to_string());
                }
                None => break (None, "stream ended".to_string()),
            }
        }
    };

    state.store(ConnectionState::Disconnected as u8, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed { code, reason });
}
