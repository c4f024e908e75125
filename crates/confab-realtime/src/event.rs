//! Normalized events the engine emits to its consumer.

use serde::Serialize;

use crate::accumulator::StreamingMessage;
use crate::tools::ToolCallRecord;
use crate::turn::TurnState;

/// Everything the session/UI layer can observe. Vendor wire shapes never
/// appear here; all content has been normalized by the router.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The socket is open and the session is live.
    Connected,
    /// The socket closed, cleanly or otherwise.
    Disconnected {
        code: Option<u16>,
        reason: String,
    },
    /// A reconnection attempt is about to run after `delay_ms`.
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    /// A reconnection attempt succeeded.
    Reconnected,
    /// Reconnection attempts are exhausted; the engine will not retry
    /// further on its own.
    ReconnectionFailed {
        attempts: u32,
    },
    /// A snapshot of the in-progress streaming message after a delta.
    Streaming {
        message: StreamingMessage,
    },
    /// A message finalized with its completion metadata.
    MessageComplete {
        message: StreamingMessage,
    },
    /// A tool call is preparing or executing.
    ToolNotification {
        tool: ToolCallRecord,
    },
    /// A previously-notified tool call finished or was swept away.
    ToolNotificationRemoved {
        id: String,
    },
    /// The in-flight response was cancelled.
    Cancelled,
    /// The turn holder changed.
    TurnChanged {
        state: TurnState,
    },
    /// A server-reported error.
    Error {
        message: String,
    },
}
