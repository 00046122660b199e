//! Match and Combat State
//!
//! `MatchRecord` is owned by the orchestration layer and tracks the
//! best-of-N lifecycle. `CombatState` is owned by the resolution path and
//! carries fighter meters and stun flags between turns and rounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::surge::SurgeCard;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Starting and maximum health.
pub const MAX_HEALTH: u32 = 100;

/// Starting and maximum energy.
pub const MAX_ENERGY: u32 = 100;

/// Guard meter saturation point.
pub const MAX_GUARD: u32 = 100;

/// Energy regained at the end of every turn.
pub const ENERGY_REGEN: u32 = 8;

// =============================================================================
// SIDE
// =============================================================================

/// One of the two seats in a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// First seat.
    Player1,
    /// Second seat.
    Player2,
}

impl Side {
    /// Both sides in seat order.
    pub const BOTH: [Side; 2] = [Side::Player1, Side::Player2];

    /// Array index (0 or 1).
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Side::Player1 => 0,
            Side::Player2 => 1,
        }
    }

    /// The other seat.
    #[inline]
    pub const fn opponent(self) -> Side {
        match self {
            Side::Player1 => Side::Player2,
            Side::Player2 => Side::Player1,
        }
    }

    /// Human label used in narrative text.
    pub const fn label(self) -> &'static str {
        match self {
            Side::Player1 => "Player 1",
            Side::Player2 => "Player 2",
        }
    }
}

// =============================================================================
// FIGHTER
// =============================================================================

/// Per-fighter meters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FighterState {
    /// 0..=MAX_HEALTH
    pub health: u32,
    /// 0..=MAX_ENERGY
    pub energy: u32,
    /// 0..=MAX_GUARD
    pub guard: u32,
}

impl FighterState {
    /// Full health and energy, empty guard.
    pub const fn fresh() -> Self {
        Self {
            health: MAX_HEALTH,
            energy: MAX_ENERGY,
            guard: 0,
        }
    }

    /// Is this fighter knocked out?
    #[inline]
    pub const fn is_down(&self) -> bool {
        self.health == 0
    }
}

impl Default for FighterState {
    fn default() -> Self {
        Self::fresh()
    }
}

// =============================================================================
// MATCH
// =============================================================================

/// Match length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFormat {
    /// First to two round wins.
    BestOf3,
    /// First to three round wins.
    BestOf5,
}

impl MatchFormat {
    /// Round wins needed to take the match.
    pub const fn rounds_to_win(self) -> u32 {
        match self {
            MatchFormat::BestOf3 => 2,
            MatchFormat::BestOf5 => 3,
        }
    }
}

/// Match lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Created, waiting to start.
    CharacterSelect,
    /// Rounds are being played.
    InProgress,
    /// A side reached the format threshold.
    Completed,
}

/// Persistent match row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    /// Match identifier.
    pub id: String,
    /// Address of the first seat.
    pub player1: String,
    /// Address of the second seat.
    pub player2: String,
    /// Best-of-N format.
    pub format: MatchFormat,
    /// Round wins per seat.
    pub rounds_won: [u32; 2],
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Set once on completion.
    pub winner: Option<Side>,
    /// Deadline for the current round's commits.
    pub move_deadline: Option<DateTime<Utc>>,
    /// Highest round whose result has been applied.
    #[serde(default)]
    pub last_resolved_round: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    /// New match in character select.
    pub fn new(
        id: impl Into<String>,
        player1: impl Into<String>,
        player2: impl Into<String>,
        format: MatchFormat,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            player1: player1.into(),
            player2: player2.into(),
            format,
            rounds_won: [0, 0],
            status: MatchStatus::CharacterSelect,
            winner: None,
            move_deadline: None,
            last_resolved_round: 0,
            created_at: now,
        }
    }

    /// Seat of an address, if it is a participant.
    pub fn side_of(&self, address: &str) -> Option<Side> {
        let address = address.trim();
        if address == self.player1 {
            Some(Side::Player1)
        } else if address == self.player2 {
            Some(Side::Player2)
        } else {
            None
        }
    }

    /// Address seated at `side`.
    pub fn address(&self, side: Side) -> &str {
        match side {
            Side::Player1 => &self.player1,
            Side::Player2 => &self.player2,
        }
    }

    /// Record a round win. Returns true if this completes the match.
    pub fn record_round_win(&mut self, side: Side) -> bool {
        self.rounds_won[side.index()] += 1;
        if self.rounds_won[side.index()] >= self.format.rounds_to_win() {
            self.status = MatchStatus::Completed;
            self.winner = Some(side);
            self.move_deadline = None;
            true
        } else {
            false
        }
    }

    /// Has the match finished?
    pub fn is_completed(&self) -> bool {
        self.status == MatchStatus::Completed
    }
}

// =============================================================================
// COMBAT STATE
// =============================================================================

/// Carry-over state for the resolution path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatState {
    /// Owning match.
    pub match_id: String,
    /// Current round (1-based).
    pub round: u32,
    /// Current turn within the round (1-based).
    pub turn: u32,
    /// Meters per seat.
    pub fighters: [FighterState; 2],
    /// Stun flags, carried across turns and round boundaries.
    pub stunned: [bool; 2],
    /// Surge selections for the current round.
    pub surge: [Option<SurgeCard>; 2],
}

impl CombatState {
    /// State at the start of round 1.
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            round: 1,
            turn: 1,
            fighters: [FighterState::fresh(); 2],
            stunned: [false, false],
            surge: [None, None],
        }
    }

    /// Meters for one seat.
    pub fn fighter(&self, side: Side) -> &FighterState {
        &self.fighters[side.index()]
    }

    /// Is `side` flagged stunned going into the next turn?
    pub fn is_stunned(&self, side: Side) -> bool {
        self.stunned[side.index()]
    }

    /// Advance to a fresh round: meters reset, surge cleared, stun kept.
    pub fn start_round(&mut self, round: u32) {
        self.round = round;
        self.turn = 1;
        self.fighters = [FighterState::fresh(); 2];
        self.surge = [None, None];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(format: MatchFormat) -> MatchRecord {
        MatchRecord::new("m1", "alice", "bob", format, Utc::now())
    }

    #[test]
    fn test_side_lookup() {
        let m = record(MatchFormat::BestOf3);
        assert_eq!(m.side_of("alice"), Some(Side::Player1));
        assert_eq!(m.side_of(" bob "), Some(Side::Player2));
        assert_eq!(m.side_of("mallory"), None);
        assert_eq!(m.address(Side::Player2), "bob");
    }

    #[test]
    fn test_best_of_three_threshold() {
        let mut m = record(MatchFormat::BestOf3);
        m.status = MatchStatus::InProgress;
        assert!(!m.record_round_win(Side::Player2));
        assert!(!m.record_round_win(Side::Player1));
        assert!(m.record_round_win(Side::Player2));
        assert_eq!(m.winner, Some(Side::Player2));
        assert!(m.is_completed());
    }

    #[test]
    fn test_best_of_five_threshold() {
        let mut m = record(MatchFormat::BestOf5);
        assert!(!m.record_round_win(Side::Player1));
        assert!(!m.record_round_win(Side::Player1));
        assert!(m.record_round_win(Side::Player1));
    }

    #[test]
    fn test_start_round_keeps_stun() {
        let mut state = CombatState::new("m1");
        state.fighters[0].health = 12;
        state.fighters[1].guard = 75;
        state.stunned = [false, true];
        state.surge = [Some(SurgeCard::Fury), None];
        state.turn = 7;

        state.start_round(2);

        assert_eq!(state.round, 2);
        assert_eq!(state.turn, 1);
        assert_eq!(state.fighters, [FighterState::fresh(); 2]);
        assert_eq!(state.surge, [None, None]);
        assert!(state.is_stunned(Side::Player2));
    }

    #[test]
    fn test_side_opponent() {
        for side in Side::BOTH {
            assert_eq!(side.opponent().opponent(), side);
            assert_ne!(side.opponent(), side);
        }
    }
}
