//! Match Event Fan-out
//!
//! Best-effort notifications keyed by match. Emitting never blocks and never
//! fails the caller; with no subscribers the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Match moved to in-progress.
    MatchStarted,
    /// A player committed.
    PlayerCommitted,
    /// The server committed a forced stun for a side.
    AutoCommitted,
    /// Both sides have a commit for the round.
    BothCommitted,
    /// A player revealed.
    PlayerRevealed,
    /// Both sides revealed.
    BothRevealed,
    /// One turn was played out.
    TurnResolved,
    /// The round finished.
    RoundResolved,
    /// The match finished.
    MatchCompleted,
}

impl EventKind {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::MatchStarted => "match_started",
            EventKind::PlayerCommitted => "player_committed",
            EventKind::AutoCommitted => "auto_committed",
            EventKind::BothCommitted => "both_committed",
            EventKind::PlayerRevealed => "player_revealed",
            EventKind::BothRevealed => "both_revealed",
            EventKind::TurnResolved => "turn_resolved",
            EventKind::RoundResolved => "round_resolved",
            EventKind::MatchCompleted => "match_completed",
        }
    }
}

/// One emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    /// Match the event belongs to.
    pub match_id: String,
    /// Event name.
    pub event: EventKind,
    /// Event body.
    pub payload: serde_json::Value,
    /// Emission time.
    pub emitted_at: DateTime<Utc>,
}

/// Sink for protocol events.
pub trait EventSink: Send + Sync + 'static {
    /// Publish an event. Must not block.
    fn emit(&self, match_id: &str, event: EventKind, payload: serde_json::Value);
}

/// Broadcast-channel sink. Subscribers filter by match themselves.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MatchEvent>,
}

impl EventBus {
    /// Bus with a given buffer. Slow subscribers lag and lose events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver for all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn emit(&self, match_id: &str, event: EventKind, payload: serde_json::Value) {
        let message = MatchEvent {
            match_id: match_id.to_string(),
            event,
            payload,
            emitted_at: Utc::now(),
        };
        if self.tx.send(message).is_err() {
            trace!(match_id, event = event.as_str(), "no subscribers");
        }
    }
}
