//! The session façade: one live conversation with the Confab service.
//!
//! A [`RealtimeSession`] owns the transport, the protocol router, the turn
//! coordinator, and the reconnection controller, and runs the event loop
//! that moves frames between them. Consumers interact only with this type
//! and the [`SessionEvent`]s it emits.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use confab_realtime_types::{CLOSE_NORMAL, ClientEvent, ServerEvent, SessionRef};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::config::{ConfigError, SessionConfig};
use crate::emitter::EventSink;
use crate::event::SessionEvent;
use crate::reconnect::ReconnectionController;
use crate::router::EventRouter;
use crate::transport::{ConnectionState, Transport, TransportError, TransportEvent};
use crate::turn::{TurnCoordinator, TurnState};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("handshake error: {0}")]
    Handshake(#[source] anyhow::Error),
}

/// Everything the event loop and the reconnect callback need to share.
struct SessionCore {
    transport: Arc<Transport>,
    router: Arc<parking_lot::Mutex<EventRouter>>,
    sink: EventSink,
    reconnect: Arc<ReconnectionController>,
    tokens: Arc<dyn TokenProvider>,
    url: String,
    audio_tx: mpsc::UnboundedSender<Bytes>,
}

pub struct RealtimeSession {
    config: SessionConfig,
    core: Arc<SessionCore>,
    turn: Arc<parking_lot::Mutex<TurnCoordinator>>,
    primary: Arc<parking_lot::Mutex<Option<SessionRef>>>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    audio_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    loop_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSession {
    /// Builds a session from a validated configuration and a token source.
    /// Nothing touches the network until [`RealtimeSession::connect`].
    pub fn new(
        config: SessionConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let sink = EventSink::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Transport::new(&config, events_tx));
        let turn = Arc::new(parking_lot::Mutex::new(TurnCoordinator::new(
            config.respect_turn_state,
        )));
        let router = EventRouter::new(turn.clone(), sink.clone());
        let primary = router.primary_handle();
        let router = Arc::new(parking_lot::Mutex::new(router));
        let reconnect = Arc::new(ReconnectionController::new(
            config.reconnection.clone(),
            sink.clone(),
        ));

        let core = Arc::new(SessionCore {
            transport,
            router,
            sink,
            reconnect,
            tokens,
            url: config.url.clone(),
            audio_tx,
        });

        Ok(Self {
            config,
            core,
            turn,
            primary,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            audio_rx: parking_lot::Mutex::new(Some(audio_rx)),
            loop_handle: parking_lot::Mutex::new(None),
        })
    }

    /// Opens the socket with a fresh bearer token and starts the event loop.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let request = handshake_request(&self.core.url, self.core.tokens.as_ref())
            .await
            .map_err(SessionError::Handshake)?;
        self.core.transport.connect(request).await?;
        self.core.sink.emit(SessionEvent::Connected);

        let mut handle = self.loop_handle.lock();
        if handle.is_none() {
            // The transport event channel outlives individual sockets, so the
            // loop is spawned once and survives reconnections.
            if let Some(events) = self.events_rx.lock().take() {
                let refresh = self.core.tokens.refresh_signal();
                *handle = Some(tokio::spawn(run_loop(self.core.clone(), events, refresh)));
            }
        }
        Ok(())
    }

    /// Stops reconnection, closes the socket cleanly, and reports the
    /// disconnect. Idempotent.
    pub async fn disconnect(&self) {
        self.core.reconnect.stop();
        let was_connected = self.core.transport.state() == ConnectionState::Connected;
        self.core
            .transport
            .disconnect(CLOSE_NORMAL, "client disconnect")
            .await;
        if was_connected {
            self.core.sink.emit(SessionEvent::Disconnected {
                code: Some(CLOSE_NORMAL),
                reason: "client disconnect".to_string(),
            });
        }
    }

    /// Sends a user text message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.core
            .transport
            .send_event(&ClientEvent::UserText { text: text.into() })
            .await?;
        Ok(())
    }

    /// Asks the service to cancel the in-flight response. The engine state
    /// is swept when the server confirms with its cancellation event.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.core.transport.send_event(&ClientEvent::Cancel).await?;
        Ok(())
    }

    /// Sends an arbitrary client event. The typed helpers below cover the
    /// common cases.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), SessionError> {
        self.core.transport.send_event(event).await?;
        Ok(())
    }

    /// Updates mutable session settings server-side.
    pub async fn update_instructions(
        &self,
        instructions: Option<String>,
    ) -> Result<(), SessionError> {
        self.core
            .transport
            .send_event(&ClientEvent::SessionUpdate { instructions })
            .await?;
        Ok(())
    }

    /// Sends one PCM16 frame, subject to the turn gate: frames outside the
    /// user's turn are dropped silently, because losing microphone audio
    /// while the agent speaks is the intended behavior, not an error.
    pub async fn send_audio(&self, frame: Bytes) -> Result<(), SessionError> {
        if !self.turn.lock().can_transmit_audio() {
            debug!("Dropping outbound audio frame outside the user's turn");
            return Ok(());
        }
        self.core.transport.send_binary(frame).await?;
        Ok(())
    }

    /// Whether the turn gate currently allows outbound audio.
    pub fn can_transmit_audio(&self) -> bool {
        self.turn.lock().can_transmit_audio()
    }

    pub fn set_respect_turn_state(&self, respect: bool) {
        self.turn.lock().set_respect_turn_state(respect);
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn.lock().state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.transport.state()
    }

    /// Registers a synchronous event listener.
    pub fn on_event(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.core.sink.on(listener);
    }

    /// Returns a channel of every future [`SessionEvent`].
    pub fn events(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.core.sink.subscribe()
    }

    /// Takes the inbound audio stream (raw PCM16 frames). Yields `None`
    /// after the first call.
    pub fn take_audio_frames(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.audio_rx.lock().take()
    }

    pub fn set_reconnect_enabled(&self, enabled: bool) {
        self.core.reconnect.set_enabled(enabled);
    }

    /// Seeds the primary session identity before the service announces it,
    /// e.g. when resuming a known session. Does not take the router lock,
    /// so it may be called from inside an event listener.
    pub fn set_primary_session(&self, session: SessionRef) {
        *self.primary.lock() = Some(session);
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Builds the WebSocket handshake with a freshly fetched bearer token.
async fn handshake_request(url: &str, tokens: &dyn TokenProvider) -> anyhow::Result<Request> {
    let token = tokens.bearer_token().await.context("token fetch failed")?;
    let mut request = url
        .into_client_request()
        .context("invalid session endpoint URL")?;
    let header = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
        .context("bearer token is not a valid header value")?;
    request.headers_mut().insert(AUTHORIZATION, header);
    Ok(request)
}

/// Waits for a token rotation, or forever if the provider never rotates.
async fn refresh_changed(signal: &mut Option<watch::Receiver<u64>>) {
    match signal {
        Some(rx) => {
            if rx.changed().await.is_err() {
                // Provider gone; no further rotations can happen.
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_loop(
    core: Arc<SessionCore>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut refresh: Option<watch::Receiver<u64>>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Opened) => {}
                Some(TransportEvent::Text(text)) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => core.router.lock().process(event),
                        // One malformed frame must not take the stream down.
                        Err(e) => warn!(error = %e, "Dropping malformed server event"),
                    }
                }
                Some(TransportEvent::Binary(data)) => {
                    let _ = core.audio_tx.send(data);
                }
                Some(TransportEvent::Closed { code, reason }) => {
                    info!(?code, %reason, "Connection closed");
                    core.sink.emit(SessionEvent::Disconnected {
                        code,
                        reason: reason.clone(),
                    });
                    if code != Some(CLOSE_NORMAL) && core.reconnect.is_enabled() {
                        start_reconnect(&core);
                    }
                }
                None => return,
            },
            _ = refresh_changed(&mut refresh) => {
                if core.transport.state() == ConnectionState::Connected {
                    info!("Credential rotated; reconnecting with the fresh token");
                    core.transport
                        .disconnect(CLOSE_NORMAL, "credential rotation")
                        .await;
                    match reconnect_once(&core).await {
                        Ok(()) => core.sink.emit(SessionEvent::Connected),
                        Err(e) => {
                            warn!(error = ?e, "Reconnect after rotation failed; backing off");
                            start_reconnect(&core);
                        }
                    }
                }
            }
        }
    }
}

/// One immediate reconnect attempt with a fresh token.
async fn reconnect_once(core: &SessionCore) -> anyhow::Result<()> {
    let request = handshake_request(&core.url, core.tokens.as_ref()).await?;
    core.transport.connect(request).await?;
    Ok(())
}

/// Kicks off a backoff reconnection cycle. A cycle already in flight is
/// left alone.
fn start_reconnect(core: &Arc<SessionCore>) {
    core.transport.mark_reconnecting();
    let cycle_core = core.clone();
    let result = core.reconnect.start(move || {
        let core = cycle_core.clone();
        async move { reconnect_once(&core).await }
    });
    if let Err(e) = result {
        debug!(reason = %e, "Reconnection cycle not started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::config::ReconnectionConfig;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as ServerRequest, Response,
    };

    fn test_config(url: String) -> SessionConfig {
        SessionConfig {
            ping_interval: None,
            reconnection: ReconnectionConfig {
                enabled: false,
                ..ReconnectionConfig::default()
            },
            ..SessionConfig::new(url)
        }
    }

    fn session(url: String) -> RealtimeSession {
        RealtimeSession::new(
            test_config(url),
            Arc::new(StaticTokenProvider::new("tok-test")),
        )
        .unwrap()
    }

    async fn local_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/session", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn recv_event(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> SessionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = RealtimeSession::new(
            SessionConfig::new("http://not-a-websocket"),
            Arc::new(StaticTokenProvider::new("tok")),
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn test_send_before_connect_errors() {
        let session = session("ws://127.0.0.1:1/session".to_string());
        assert!(matches!(
            session.send_text("hello").await,
            Err(SessionError::Transport(TransportError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn test_audio_outside_user_turn_is_dropped_silently() {
        let session = session("ws://127.0.0.1:1/session".to_string());
        // Idle state, gate closed: dropped without touching the transport.
        assert!(!session.can_transmit_audio());
        assert!(session.send_audio(Bytes::from_static(&[0, 1])).await.is_ok());
    }

    #[tokio::test]
    async fn test_handshake_carries_bearer_token() {
        let (listener, url) = local_listener().await;
        let auth = Arc::new(parking_lot::Mutex::new(None::<String>));

        let seen = auth.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &ServerRequest, resp: Response| -> Result<Response, ErrorResponse> {
                *seen.lock() = req
                    .headers()
                    .get(AUTHORIZATION)
                    .map(|v| v.to_str().unwrap().to_string());
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let session = session(url);
        session.connect().await.unwrap();
        server.await.unwrap();
        assert_eq!(auth.lock().as_deref(), Some("Bearer tok-test"));
    }

    #[tokio::test]
    async fn test_server_events_flow_to_consumer() {
        let (listener, url) = local_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in [
                r#"{"type":"session_ready","session":{"session_id":"sess_1"}}"#,
                r#"{"type":"turn_started","role":"user"}"#,
                r#"{"type":"message_delta","delta":"Hi there"}"#,
                r#"{"type":"agent_status","running":false,"stop_reason":"end_turn"}"#,
            ] {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            // Hold the socket open until the client hangs up.
            while ws.next().await.is_some() {}
        });

        let session = session(url);
        let mut events = session.events();
        session.connect().await.unwrap();

        assert!(matches!(recv_event(&mut events).await, SessionEvent::Connected));
        assert!(matches!(
            recv_event(&mut events).await,
            SessionEvent::TurnChanged {
                state: TurnState::UserTurn
            }
        ));
        let SessionEvent::Streaming { message } = recv_event(&mut events).await else {
            panic!("expected streaming snapshot");
        };
        assert_eq!(message.content, "Hi there");
        let SessionEvent::MessageComplete { message } = recv_event(&mut events).await else {
            panic!("expected completion");
        };
        assert_eq!(message.metadata.stop_reason.as_deref(), Some("end_turn"));

        assert!(session.can_transmit_audio());
        session.disconnect().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frames_do_not_break_the_stream() {
        let (listener, url) = local_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("this is not json".into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"message_delta","delta":"still alive"}"#.into()))
                .await
                .unwrap();
            while ws.next().await.is_some() {}
        });

        let session = session(url);
        let mut events = session.events();
        session.connect().await.unwrap();

        assert!(matches!(recv_event(&mut events).await, SessionEvent::Connected));
        let SessionEvent::Streaming { message } = recv_event(&mut events).await else {
            panic!("expected streaming snapshot");
        };
        assert_eq!(message.content, "still alive");
        session.disconnect().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_frames_reach_audio_channel() {
        let (listener, url) = local_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Binary(Bytes::from_static(&[1, 2, 3, 4])))
                .await
                .unwrap();
            while ws.next().await.is_some() {}
        });

        let session = session(url);
        let mut audio = session.take_audio_frames().expect("first take");
        assert!(session.take_audio_frames().is_none());
        session.connect().await.unwrap();

        let frame = timeout(Duration::from_secs(5), audio.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_ref(), &[1, 2, 3, 4]);
        session.disconnect().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_may_set_primary_session_during_dispatch() {
        let (listener, url) = local_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"type":"message_delta","delta":"hi"}"#.into()))
                .await
                .unwrap();
            while ws.next().await.is_some() {}
        });

        let session = Arc::new(session(url));
        let mut events = session.events();
        let hook = session.clone();
        session.on_event(move |event| {
            if matches!(event, SessionEvent::Streaming { .. }) {
                hook.set_primary_session(SessionRef::primary("sess_seeded"));
            }
        });
        session.connect().await.unwrap();

        // The listener runs while the event loop holds the router lock; if
        // seeding the session identity needed that lock, this would hang
        // and the receive below would time out.
        assert!(matches!(recv_event(&mut events).await, SessionEvent::Connected));
        assert!(matches!(
            recv_event(&mut events).await,
            SessionEvent::Streaming { .. }
        ));
        session.disconnect().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_abnormal_close_triggers_reconnection() {
        let (listener, url) = local_listener().await;

        let server = tokio::spawn(async move {
            // First connection is dropped without a close handshake; the
            // second is accepted and held open.
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let config = SessionConfig {
            reconnection: ReconnectionConfig {
                enabled: true,
                initial_delay: Duration::from_millis(10),
                jitter_factor: 0.0,
                ..ReconnectionConfig::default()
            },
            ..test_config(url)
        };
        let session =
            RealtimeSession::new(config, Arc::new(StaticTokenProvider::new("tok"))).unwrap();
        let mut events = session.events();
        session.connect().await.unwrap();

        assert!(matches!(recv_event(&mut events).await, SessionEvent::Connected));
        assert!(matches!(
            recv_event(&mut events).await,
            SessionEvent::Disconnected { .. }
        ));
        assert!(matches!(
            recv_event(&mut events).await,
            SessionEvent::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(recv_event(&mut events).await, SessionEvent::Reconnected));
        assert_eq!(session.connection_state(), ConnectionState::Connected);

        session.disconnect().await;
        server.await.unwrap();
    }
}
