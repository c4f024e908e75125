//! Client engine for realtime conversational-agent sessions over WebSocket.
//!
//! [`RealtimeSession`] is the entry point: give it a [`SessionConfig`] and a
//! [`TokenProvider`], call [`RealtimeSession::connect`], and consume
//! [`SessionEvent`]s. Underneath, the engine runs a heartbeat-supervised
//! transport, reconnects with jittered exponential backoff, accumulates
//! streaming deltas into whole messages, tracks tool-call lifecycles, and
//! coordinates server-authoritative turn taking.
//!
//! ```no_run
//! use std::sync::Arc;
//! use confab_realtime::{RealtimeSession, SessionConfig, StaticTokenProvider};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SessionConfig::new("wss://confab.example/session");
//! let tokens = Arc::new(StaticTokenProvider::new("my-token"));
//! let session = RealtimeSession::new(config, tokens)?;
//! let mut events = session.events();
//! session.connect().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod accumulator;
pub mod auth;
pub mod config;
pub mod emitter;
pub mod event;
pub mod pcm;
pub mod reconnect;
pub mod router;
pub mod session;
pub mod tools;
pub mod transport;
pub mod turn;

pub use accumulator::{MessageAccumulator, MessageKind, MessageStatus, StreamingMessage};
pub use auth::{RotatingTokenProvider, StaticTokenProvider, TokenProvider};
pub use config::{ConfigError, ReconnectionConfig, SessionConfig};
pub use emitter::EventSink;
pub use event::SessionEvent;
pub use reconnect::{ReconnectionController, backoff_delay};
pub use router::EventRouter;
pub use session::{RealtimeSession, SessionError};
pub use tools::{ToolCallRecord, ToolCallTracker, ToolStatus};
pub use transport::{ConnectionState, Transport, TransportError, TransportEvent};
pub use turn::{TurnCoordinator, TurnState};

pub use confab_realtime_types as types;
