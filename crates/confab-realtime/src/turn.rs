//! Server-authoritative turn-taking state machine.
//!
//! The client never assigns itself a turn: state changes only when the
//! service pushes a turn-start or turn-end event. The coordinator's single
//! job outward is the [`TurnCoordinator::can_transmit_audio`] predicate that
//! gates outbound audio frames.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use confab_realtime_types::TurnRole;
use serde::Serialize;
use tracing::debug;

/// History entries retained before the oldest are dropped.
const MAX_TURN_HISTORY: usize = 256;

/// Whose turn it is to speak.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    UserTurn,
    AgentTurn,
}

impl From<TurnRole> for TurnState {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => TurnState::UserTurn,
            TurnRole::Agent => TurnState::AgentTurn,
        }
    }
}

/// One transition in the turn log. `previous_duration` is how long the state
/// being left had been held.
#[derive(Debug, Clone)]
pub struct TurnHistoryEntry {
    pub state: TurnState,
    pub entered_at: DateTime<Utc>,
    pub previous_duration: Duration,
}

/// Read-only aggregates derived from the history log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnStats {
    pub user_turns: usize,
    pub agent_turns: usize,
    pub avg_user_turn: Option<Duration>,
    pub avg_agent_turn: Option<Duration>,
}

pub struct TurnCoordinator {
    state: TurnState,
    respect_turn_state: bool,
    entered_at: Instant,
    history: VecDeque<TurnHistoryEntry>,
}

impl TurnCoordinator {
    pub fn new(respect_turn_state: bool) -> Self {
        Self {
            state: TurnState::Idle,
            respect_turn_state,
            entered_at: Instant::now(),
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether outbound audio may be transmitted right now.
    ///
    /// Unconditionally true when turn-respecting is disabled; otherwise true
    /// only while the user holds the turn.
    pub fn can_transmit_audio(&self) -> bool {
        !self.respect_turn_state || self.state == TurnState::UserTurn
    }

    pub fn set_respect_turn_state(&mut self, respect: bool) {
        self.respect_turn_state = respect;
    }

    /// Applies a server turn-start. A start while the *other* party holds the
    /// turn implies that party's turn-end first, producing its own history
    /// entry. A start for the party already holding the turn is a no-op.
    ///
    /// Returns the resulting state.
    pub fn on_turn_started(&mut self, role: TurnRole) -> TurnState {
        let target = TurnState::from(role);
        if self.state == target {
            debug!(?role, "Duplicate turn-start for the current holder; ignoring");
            return self.state;
        }
        if self.state != TurnState::Idle {
            self.transition(TurnState::Idle);
        }
        self.transition(target);
        self.state
    }

    /// Applies a server turn-end. Returns the resulting state.
    pub fn on_turn_ended(&mut self) -> TurnState {
        if self.state != TurnState::Idle {
            self.transition(TurnState::Idle);
        }
        self.state
    }

    pub fn history(&self) -> impl Iterator<Item = &TurnHistoryEntry> {
        self.history.iter()
    }

    /// Derives turn counts and average holds from the log. Durations are
    /// attributed to the state that was *left*, recorded on the entry that
    /// replaced it.
    pub fn stats(&self) -> TurnStats {
        let mut user_turns = 0;
        let mut agent_turns = 0;
        let mut user_total = Duration::ZERO;
        let mut agent_total = Duration::ZERO;

        let entries: Vec<&TurnHistoryEntry> = self.history.iter().collect();
        for (i, entry) in entries.iter().enumerate() {
            match entry.state {
                TurnState::UserTurn => user_turns += 1,
                TurnState::AgentTurn => agent_turns += 1,
                TurnState::Idle => {}
            }
            if i > 0 {
                match entries[i - 1].state {
                    TurnState::UserTurn => user_total += entry.previous_duration,
                    TurnState::AgentTurn => agent_total += entry.previous_duration,
                    TurnState::Idle => {}
                }
            }
        }

        // A zero total still averages to zero when turns were recorded;
        // `None` means no turns at all.
        let avg =
            |total: Duration, count: usize| (count > 0).then(|| total / count as u32);
        TurnStats {
            user_turns,
            agent_turns,
            avg_user_turn: avg(user_total, user_turns),
            avg_agent_turn: avg(agent_total, agent_turns),
        }
    }

    fn transition(&mut self, next: TurnState) {
        let previous_duration = self.entered_at.elapsed();
        self.state = next;
        self.entered_at = Instant::now();
        if self.history.len() == MAX_TURN_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(TurnHistoryEntry {
            state: next,
            entered_at: Utc::now(),
            previous_duration,
        });
    }
}
