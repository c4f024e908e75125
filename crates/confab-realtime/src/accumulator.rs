//! Buffers streaming deltas into one coherent message at a time.
//!
//! Exactly one message may be open per accumulator. Starting a different
//! kind while one is open implicitly finalizes the old one (the caller
//! receives it for emission); starting the *same* kind again is tolerated as
//! a no-op. That asymmetry is deliberate: changing it would change the
//! number of observable completion events.

use chrono::{DateTime, Utc};
use confab_realtime_types::Usage;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::tools::ToolSummary;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccumulatorError {
    #[error("no streaming message is open")]
    NoOpenMessage,
}

/// What slot a message occupies.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Assistant,
    Thought,
    User,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    Complete,
    Error,
}

/// Parent identifiers attached to messages from a delegated sub-session.
/// Purely informational; nothing downstream branches on it.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SubSessionInfo {
    pub session_id: String,
    pub primary_session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
}

/// Completion metadata attached when a message finalizes.
#[derive(Serialize, Debug, Clone, Default)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolSummary>,
    /// Presentation hint for thought messages; no behavioral difference.
    pub collapsed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_session: Option<SubSessionInfo>,
}

/// Metadata supplied by the caller at finalize time.
#[derive(Debug, Clone, Default)]
pub struct FinalizeMetadata {
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
    pub tool_calls: Vec<ToolSummary>,
}

/// One in-progress or completed message.
#[derive(Serialize, Debug, Clone)]
pub struct StreamingMessage {
    pub id: Uuid,
    pub kind: MessageKind,
    pub content: String,
    pub status: MessageStatus,
    pub started_at: DateTime<Utc>,
    pub metadata: MessageMetadata,
}

#[derive(Default)]
pub struct MessageAccumulator {
    open: Option<StreamingMessage>,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new message of `kind`.
    ///
    /// If a message of a *different* kind is open it is implicitly finalized
    /// and returned so the caller can emit its completion. A duplicate start
    /// of the same kind is a caller error tolerated as a no-op.
    pub fn start(&mut self, kind: MessageKind) -> Option<StreamingMessage> {
        let finalized = match &self.open {
            Some(open) if open.kind == kind => {
                warn!(?kind, "Duplicate start for the open message kind; ignoring");
                return None;
            }
            Some(_) => self.finalize(FinalizeMetadata::default()).ok(),
            None => None,
        };

        self.open = Some(new_message(kind));
        finalized
    }

    /// Appends a delta to the open message, auto-opening an assistant
    /// message if none is open. Streaming text must never be silently
    /// dropped, so the orphaned-delta case is recovered, not rejected.
    ///
    /// Returns a snapshot of the open message after the append.
    pub fn append(&mut self, delta: &str) -> StreamingMessage {
        let open = self.open.get_or_insert_with(|| {
            debug!("Delta arrived with no open message; auto-opening an assistant slot");
            new_message(MessageKind::Assistant)
        });
        open.content.push_str(delta);
        open.clone()
    }

    /// Marks the open message complete, attaches metadata, and clears the
    /// slot. Erroring when nothing is open mutates no state.
    pub fn finalize(
        &mut self,
        metadata: FinalizeMetadata,
    ) -> Result<StreamingMessage, AccumulatorError> {
        let mut message = self.open.take().ok_or(AccumulatorError::NoOpenMessage)?;
        message.status = MessageStatus::Complete;
        message.metadata.usage = metadata.usage;
        message.metadata.stop_reason = metadata.stop_reason;
        message.metadata.tool_calls = metadata.tool_calls;
        // Thoughts render collapsed by default.
        message.metadata.collapsed = message.kind == MessageKind::Thought;
        Ok(message)
    }

    /// Flags the open message, if any, as belonging to a delegated
    /// sub-session.
    pub fn mark_sub_session(&mut self, info: SubSessionInfo) {
        if let Some(open) = self.open.as_mut() {
            open.metadata.sub_session = Some(info);
        }
    }

    pub fn open_kind(&self) -> Option<MessageKind> {
        self.open.as_ref().map(|m| m.kind)
    }

    pub fn current(&self) -> Option<&StreamingMessage> {
        self.open.as_ref()
    }

    /// Drops whatever is open without emitting anything.
    pub fn reset(&mut self) {
        self.open = None;
    }
}

fn new_message(kind: MessageKind) -> StreamingMessage {
    StreamingMessage {
        id: Uuid::new_v4(),
        kind,
        content: String::new(),
        status: MessageStatus::Streaming,
        started_at: Utc::now(),
        metadata: MessageMetadata::default(),
    }
}
