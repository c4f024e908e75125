//! Turns raw server events into engine state changes and outward events.
//!
//! The router is synchronous and single-threaded by construction: the
//! session loop feeds it one decoded [`ServerEvent`] at a time. All vendor
//! content is normalized before anything leaves the router, and the reserved
//! thinking tool is suppressed from tool notifications here, not in the
//! tracker.

use std::sync::Arc;

use confab_realtime_types::{ServerEvent, SessionRef, THINKING_TOOL_NAME};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::accumulator::{FinalizeMetadata, MessageAccumulator, MessageKind, SubSessionInfo};
use crate::emitter::EventSink;
use crate::event::SessionEvent;
use crate::tools::ToolCallTracker;
use crate::turn::TurnCoordinator;

pub struct EventRouter {
    accumulator: MessageAccumulator,
    tracker: ToolCallTracker,
    turn: Arc<Mutex<TurnCoordinator>>,
    sink: EventSink,
    // Behind its own lock so the owner can set it while the router itself
    // is locked for dispatch (e.g. from inside an event listener).
    primary: Arc<Mutex<Option<SessionRef>>>,
}

impl EventRouter {
    pub fn new(turn: Arc<Mutex<TurnCoordinator>>, sink: EventSink) -> Self {
        Self {
            accumulator: MessageAccumulator::new(),
            tracker: ToolCallTracker::new(),
            turn,
            sink,
            primary: Arc::new(Mutex::new(None)),
        }
    }

    /// The session identity announced by the service, once known.
    pub fn primary_session(&self) -> Option<SessionRef> {
        self.primary.lock().clone()
    }

    /// Overrides the primary session identity, e.g. when resuming a known
    /// session before the service has announced it.
    pub fn set_primary_session(&self, session: SessionRef) {
        *self.primary.lock() = Some(session);
    }

    /// Shared handle to the primary session identity, for setting it
    /// without going through the router.
    pub(crate) fn primary_handle(&self) -> Arc<Mutex<Option<SessionRef>>> {
        self.primary.clone()
    }

    /// Applies one server event. Never fails: malformed or unexpected input
    /// is logged and absorbed so the stream keeps flowing.
    pub fn process(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionReady { session } => {
                debug!(session_id = %session.session_id, "Session ready");
                *self.primary.lock() = Some(session);
            }
            ServerEvent::SessionUpdated { session } => {
                *self.primary.lock() = Some(session);
            }
            ServerEvent::Pong => {}
            ServerEvent::MessageDelta { delta, session_id } => {
                self.open_slot(MessageKind::Assistant);
                let text = delta.normalize().flatten_text();
                // Mark before snapshotting so the streaming event already
                // carries the sub-session flag.
                self.accumulator.append(&text);
                self.maybe_mark_sub_session(session_id.as_deref());
                if let Some(snapshot) = self.accumulator.current() {
                    let message = snapshot.clone();
                    self.sink.emit(SessionEvent::Streaming { message });
                }
            }
            ServerEvent::ThoughtDelta { delta, session_id } => {
                self.open_slot(MessageKind::Thought);
                // A thought delta means the reserved tool is done narrating;
                // retire its record without any notification traffic.
                self.tracker.retire_thinking();
                self.accumulator.append(&delta);
                self.maybe_mark_sub_session(session_id.as_deref());
                if let Some(snapshot) = self.accumulator.current() {
                    let message = snapshot.clone();
                    self.sink.emit(SessionEvent::Streaming { message });
                }
            }
            ServerEvent::AgentStatus {
                running,
                usage,
                stop_reason,
                ..
            } => {
                if running {
                    return;
                }
                self.tracker.retire_thinking();
                let metadata = FinalizeMetadata {
                    usage,
                    stop_reason,
                    tool_calls: self.tracker.completed_summaries(),
                };
                match self.accumulator.finalize(metadata) {
                    Ok(message) => {
                        self.sink.emit(SessionEvent::MessageComplete { message });
                        self.tracker.clear_completed();
                    }
                    Err(_) => debug!("Agent stopped with no open message"),
                }
            }
            ServerEvent::ToolSelect {
                id,
                name,
                arguments,
                ..
            } => {
                let record = self.tracker.on_select(id, name, arguments);
                if record.name != THINKING_TOOL_NAME {
                    self.sink.emit(SessionEvent::ToolNotification { tool: record });
                }
            }
            ServerEvent::ToolCall {
                id,
                name,
                active,
                result,
                ..
            } => {
                if active {
                    let record = self.tracker.on_active(id, name.as_deref());
                    if record.name != THINKING_TOOL_NAME {
                        self.sink.emit(SessionEvent::ToolNotification { tool: record });
                    }
                } else {
                    let normalized = result.map(|c| c.normalize());
                    let record = self.tracker.on_complete(&id, name.as_deref(), normalized);
                    if record.name != THINKING_TOOL_NAME {
                        self.sink.emit(SessionEvent::ToolNotificationRemoved { id });
                    }
                }
            }
            ServerEvent::TurnStarted { role } => {
                let mut turn = self.turn.lock();
                let before = turn.state();
                let after = turn.on_turn_started(role);
                drop(turn);
                if after != before {
                    self.sink.emit(SessionEvent::TurnChanged { state: after });
                }
            }
            ServerEvent::TurnEnded { .. } => {
                let mut turn = self.turn.lock();
                let before = turn.state();
                let after = turn.on_turn_ended();
                drop(turn);
                if after != before {
                    self.sink.emit(SessionEvent::TurnChanged { state: after });
                }
            }
            ServerEvent::ResponseCancelled { .. } => {
                let metadata = FinalizeMetadata {
                    stop_reason: Some("cancelled".to_string()),
                    ..FinalizeMetadata::default()
                };
                if let Ok(message) = self.accumulator.finalize(metadata) {
                    self.sink.emit(SessionEvent::MessageComplete { message });
                }
                for record in self.tracker.active_notifications() {
                    if record.name != THINKING_TOOL_NAME {
                        self.sink
                            .emit(SessionEvent::ToolNotificationRemoved { id: record.id });
                    }
                }
                self.tracker.reset();
                self.accumulator.reset();
                self.sink.emit(SessionEvent::Cancelled);
            }
            // Full-history replays belong to the persistence layer, and
            // completion is derived from agent status, so both are ignored.
            ServerEvent::HistorySnapshot { .. } => {}
            ServerEvent::MessageComplete { .. } => {}
            ServerEvent::Error { message, code } => {
                warn!(?code, %message, "Server reported an error");
                self.sink.emit(SessionEvent::Error { message });
            }
            ServerEvent::Unknown => {
                warn!("Ignoring server event with an unknown discriminant");
            }
        }
    }

    /// Ensures a message slot of `kind` is open, emitting the completion of
    /// any implicitly finalized message of another kind.
    fn open_slot(&mut self, kind: MessageKind) {
        if self.accumulator.open_kind() == Some(kind) {
            return;
        }
        if let Some(finalized) = self.accumulator.start(kind) {
            self.sink
                .emit(SessionEvent::MessageComplete { message: finalized });
        }
    }

    /// Flags the open message as sub-session output when the event's
    /// session id differs from the primary session.
    fn maybe_mark_sub_session(&mut self, session_id: Option<&str>) {
        let Some(session_id) = session_id else {
            return;
        };
        let Some(primary_id) = self.primary.lock().as_ref().map(|p| p.session_id.clone())
        else {
            return;
        };
        if session_id == primary_id {
            return;
        }
        self.accumulator.mark_sub_session(SubSessionInfo {
            session_id: session_id.to_string(),
            primary_session_id: primary_id,
            parent_session_id: None,
        });
    }
}
