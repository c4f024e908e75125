//! Wire protocol types for the Confab realtime agent API.
//!
//! The protocol is a single persistent WebSocket carrying two payload kinds:
//! UTF-8 JSON text frames for all control and event traffic (tagged by a
//! `type` discriminant), and raw binary frames exclusively for linear 16-bit
//! PCM audio with no envelope.
//!
//! - `server`: events pushed by the service to the client.
//! - `client`: events the client sends to the service.
//! - `content`: vendor content shapes and their normalization into one
//!   internal segment type.
//! - `session`: session identifiers, including sub-session parentage.

pub mod client;
pub mod content;
pub mod server;
pub mod session;

pub use client::ClientEvent;
pub use content::{MessageContent, NormalizedContent, Segment};
pub use server::{ServerEvent, TurnRole, Usage};
pub use session::SessionRef;

/// Close code for a clean, client-initiated disconnect. Suppresses
/// reconnection.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code used when the heartbeat goes unanswered. Transport-internal;
/// always triggers reconnection when reconnection is enabled.
pub const CLOSE_STALE_HEARTBEAT: u16 = 4002;

/// The one tool name excluded from the tool-notification pipeline. Its
/// content is delivered through the thought channel instead, so selection and
/// completion are acknowledged for bookkeeping only.
pub const THINKING_TOOL_NAME: &str = "think";
