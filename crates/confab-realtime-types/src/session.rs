//! Session identity, including delegated sub-session parentage.

use serde::{Deserialize, Serialize};

/// Identifies the conversation an event belongs to.
///
/// The primary conversation carries the user's own session id. When the agent
/// delegates to another agent, events from that nested conversation arrive
/// with a different `session_id` and, usually, the spawning ids filled in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    /// The id of the session this event belongs to.
    pub session_id: String,
    /// The session that spawned this one, if it is a delegated sub-session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    /// The user's primary session id, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_session_id: Option<String>,
}

impl SessionRef {
    /// Creates a reference to a primary session with no parentage.
    pub fn primary(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            parent_session_id: None,
            user_session_id: None,
        }
    }
}
