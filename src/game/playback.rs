//! Turn Playback Loop
//!
//! Drives the combat engine across the ten-turn plan horizon for one round.
//!
//! # Determinism
//!
//! Effective moves come from the carried stun flags plus the revealed
//! plans, and stun flags are only ever updated from engine output. Given the
//! same starting `CombatState` and plans, playback produces identical
//! records.

use serde::{Deserialize, Serialize};

use crate::game::combat::{resolve_turn, TurnOutcome};
use crate::game::moves::{Move, MovePlan, PLAN_LENGTH};
use crate::game::state::{CombatState, MatchFormat, Side};
use crate::game::surge::{SurgeCard, SurgeModifiers};

/// Turns in a round.
pub const MAX_TURNS: u32 = PLAN_LENGTH as u32;

/// How a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEnding {
    /// One fighter reached zero health.
    Knockout,
    /// Both fighters reached zero health on the same turn.
    DoubleKnockout,
    /// Horizon reached; higher health wins.
    Decision,
    /// Horizon reached with equal health.
    Draw,
}

/// Round-win standing going into the round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// Round wins per seat before this round.
    pub rounds_won: [u32; 2],
    /// Match format.
    pub format: MatchFormat,
}

impl Standing {
    /// Would a round win for `side` end the match?
    pub fn clinches(&self, side: Side) -> bool {
        self.rounds_won[side.index()] + 1 >= self.format.rounds_to_win()
    }
}

/// One persisted turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    /// Owning match.
    pub match_id: String,
    /// Round number.
    pub round: u32,
    /// Turn number within the round (1-based).
    pub turn: u32,
    /// What each plan said for this turn.
    pub planned: [Move; 2],
    /// Engine result for the effective moves.
    pub outcome: TurnOutcome,
    /// Set on the last turn of the round.
    pub round_ending: Option<RoundEnding>,
    /// Round winner, on the last turn of a decided round.
    pub round_winner: Option<Side>,
    /// This turn ended the match.
    pub match_over: bool,
    /// Match winner when `match_over`.
    pub match_winner: Option<Side>,
}

/// Result of a fully played round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    /// Round number.
    pub round: u32,
    /// How the round ended.
    pub ending: RoundEnding,
    /// Round winner, `None` for a draw or double knockout.
    pub winner: Option<Side>,
    /// Turns actually played.
    pub turns: Vec<TurnRecord>,
    /// Combat state after the last turn, stun flags included.
    pub state: CombatState,
    /// The match is over.
    pub match_over: bool,
    /// Match winner when `match_over`.
    pub match_winner: Option<Side>,
}

/// Stepwise playback of one round.
pub struct TurnPlayback {
    plans: [MovePlan; 2],
    mods: [SurgeModifiers; 2],
    state: CombatState,
    standing: Standing,
    records: Vec<TurnRecord>,
    ending: Option<(RoundEnding, Option<Side>)>,
}

impl TurnPlayback {
    /// Start playback from `state.turn`.
    ///
    /// Surge selections are recorded on the state and folded into modifiers
    /// once; they apply to every turn of the round.
    pub fn new(
        mut state: CombatState,
        plans: [MovePlan; 2],
        surge: [Option<SurgeCard>; 2],
        standing: Standing,
    ) -> Self {
        state.surge = surge;
        let mods = surge.map(SurgeModifiers::for_selection);
        Self {
            plans,
            mods,
            state,
            standing,
            records: Vec::with_capacity(PLAN_LENGTH),
            ending: None,
        }
    }

    /// Current combat state.
    pub fn state(&self) -> &CombatState {
        &self.state
    }

    /// Has the round ended?
    pub fn is_finished(&self) -> bool {
        self.ending.is_some() || self.state.turn > MAX_TURNS
    }

    /// Effective move for `side` on the current turn.
    pub fn effective_move(&self, side: Side) -> Move {
        let i = side.index();
        if self.state.stunned[i] {
            return Move::Stunned;
        }
        self.plans[i].at_turn(self.state.turn).unwrap_or(Move::Stunned)
    }

    /// Resolve the next turn. Returns `None` once the round has ended.
    pub fn step(&mut self) -> Option<TurnRecord> {
        if self.is_finished() {
            return None;
        }

        let turn = self.state.turn;
        let planned = [0, 1].map(|i| self.plans[i].at_turn(turn).unwrap_or(Move::Stunned));
        let effective = Side::BOTH.map(|side| self.effective_move(side));

        let outcome = resolve_turn(
            effective[0],
            effective[1],
            self.state.fighters[0],
            self.state.fighters[1],
            &self.mods[0],
            &self.mods[1],
        );

        #[cfg(feature = "debug-tracing")]
        tracing::trace!(
            match_id = %self.state.match_id,
            round = self.state.round,
            turn,
            ?effective,
            damage = ?outcome.damage_taken,
            "turn resolved"
        );

        self.state.fighters = outcome.fighters;
        self.state.stunned = outcome.stunned_next;

        let ending = if outcome.round_over {
            Some(match outcome.winner {
                Some(side) => (RoundEnding::Knockout, Some(side)),
                None => (RoundEnding::DoubleKnockout, None),
            })
        } else if turn >= MAX_TURNS {
            let [h1, h2] = outcome.fighters.map(|f| f.health);
            Some(match h1.cmp(&h2) {
                std::cmp::Ordering::Greater => (RoundEnding::Decision, Some(Side::Player1)),
                std::cmp::Ordering::Less => (RoundEnding::Decision, Some(Side::Player2)),
                std::cmp::Ordering::Equal => (RoundEnding::Draw, None),
            })
        } else {
            None
        };

        let round_winner = ending.and_then(|(_, w)| w);
        let match_winner = round_winner.filter(|side| self.standing.clinches(*side));

        let record = TurnRecord {
            match_id: self.state.match_id.clone(),
            round: self.state.round,
            turn,
            planned,
            outcome,
            round_ending: ending.map(|(e, _)| e),
            round_winner,
            match_over: match_winner.is_some(),
            match_winner,
        };

        self.state.turn = turn + 1;
        self.ending = ending;
        self.records.push(record.clone());
        Some(record)
    }

    /// Play any remaining turns and summarize the round.
    pub fn run_to_end(self) -> RoundSummary {
        self.finish()
    }

    /// Summarize a round whose turns have been stepped through.
    ///
    /// Remaining turns are played first if the round has not ended.
    pub fn finish(mut self) -> RoundSummary {
        while self.step().is_some() {}
        let (ending, winner) = self.ending.unwrap_or((RoundEnding::Draw, None));
        let match_winner = winner.filter(|side| self.standing.clinches(*side));
        RoundSummary {
            round: self.state.round,
            ending,
            winner,
            turns: self.records,
            state: self.state,
            match_over: match_winner.is_some(),
            match_winner,
        }
    }
}
