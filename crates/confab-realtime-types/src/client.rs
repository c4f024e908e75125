//! Events the client sends to the Confab service.

use serde::Serialize;

/// Every event the client can send, keyed by the `type` discriminant.
///
/// Audio is not represented here: PCM16 frames travel as raw binary
/// WebSocket messages with no JSON envelope.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat probe. The server answers with `pong`, but any inbound
    /// frame clears the liveness flag.
    Ping,
    /// A text message from the user to the agent.
    UserText { text: String },
    /// Cancel the in-flight response.
    Cancel,
    /// Update mutable session settings.
    SessionUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
    },
}
