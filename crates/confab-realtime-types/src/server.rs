//! Events pushed by the Confab service to the client.

use crate::content::MessageContent;
use crate::session::SessionRef;
use serde::{Deserialize, Serialize};

/// The party a turn belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

/// Token accounting attached to a completed response.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

/// Every event the service can push, keyed by the `type` discriminant.
///
/// Unrecognized discriminants deserialize to [`ServerEvent::Unknown`] so a
/// protocol addition on the server side never breaks the event loop.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The session is established; carries the session's identity.
    SessionReady { session: SessionRef },
    /// The session's identity or settings changed.
    SessionUpdated { session: SessionRef },
    /// Heartbeat reply. Any inbound frame counts as liveness, not only this.
    Pong,
    /// An incremental fragment of the assistant's streaming reply.
    MessageDelta {
        delta: MessageContent,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// An incremental fragment of the agent's internal reasoning.
    ThoughtDelta {
        delta: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Whether the agent is currently producing a response. `running: false`
    /// closes out the in-flight message with the attached metadata.
    AgentStatus {
        running: bool,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        stop_reason: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// The agent chose a tool and snapshotted its arguments.
    ToolSelect {
        id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// A tool call changed execution state: `active: true` means it started
    /// running, `active: false` means it finished with the attached result.
    ToolCall {
        id: String,
        #[serde(default)]
        name: Option<String>,
        active: bool,
        #[serde(default)]
        result: Option<MessageContent>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// One party's turn to speak began. Implies the end of the other party's
    /// turn if one was in progress.
    TurnStarted { role: TurnRole },
    /// The current turn ended without a successor.
    TurnEnded {
        #[serde(default)]
        role: Option<TurnRole>,
    },
    /// The in-flight response was cancelled.
    ResponseCancelled {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// A full-history replay. Handled by the persistence layer, ignored here.
    HistorySnapshot {
        #[serde(default)]
        messages: Vec<serde_json::Value>,
    },
    /// Redundant completion echo; completion is derived from `AgentStatus`.
    MessageComplete {
        #[serde(default)]
        message: Option<serde_json::Value>,
    },
    /// A server-side error report.
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    /// Any discriminant this client does not know.
    #[serde(other)]
    Unknown,
}
