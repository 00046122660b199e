//! Moves and Move Plans
//!
//! A plan is exactly ten moves, one per turn of the round horizon.
//! Moves have a small numeric code used inside commitments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of turns a committed plan covers.
pub const PLAN_LENGTH: usize = 10;

/// A single combat move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Move {
    /// No action. Used for stunned turns and forced plans.
    Stunned = 0,
    /// Fast, cheap, weak.
    Punch = 1,
    /// Breaks blocks.
    Kick = 2,
    /// Absorbs attacks and builds guard.
    Block = 3,
    /// Expensive heavy hit.
    Special = 4,
}

/// Errors building moves or plans.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    /// Numeric code outside the enumeration.
    #[error("invalid move code {0}")]
    InvalidCode(u8),
    /// Name not recognised.
    #[error("unknown move '{0}'")]
    UnknownName(String),
    /// Plan did not have exactly ten entries.
    #[error("move plan must have {expected} moves, got {got}")]
    WrongPlanLength {
        /// Required length.
        expected: usize,
        /// Provided length.
        got: usize,
    },
}

impl Move {
    /// All moves a player may choose (stunned is never chosen).
    pub const PLAYABLE: [Move; 4] = [Move::Punch, Move::Kick, Move::Block, Move::Special];

    /// Commitment code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a commitment code.
    pub fn from_code(code: u8) -> Result<Self, MoveError> {
        match code {
            0 => Ok(Move::Stunned),
            1 => Ok(Move::Punch),
            2 => Ok(Move::Kick),
            3 => Ok(Move::Block),
            4 => Ok(Move::Special),
            other => Err(MoveError::InvalidCode(other)),
        }
    }

    /// Wire name.
    pub const fn name(self) -> &'static str {
        match self {
            Move::Stunned => "stunned",
            Move::Punch => "punch",
            Move::Kick => "kick",
            Move::Block => "block",
            Move::Special => "special",
        }
    }

    /// Does this move deal damage?
    #[inline]
    pub const fn is_attack(self) -> bool {
        matches!(self, Move::Punch | Move::Kick | Move::Special)
    }

    /// The one move this move beats.
    ///
    /// Punch beats special, special beats kick, kick beats block,
    /// block beats punch. Stunned beats nothing.
    pub const fn beats_move(self) -> Option<Move> {
        match self {
            Move::Punch => Some(Move::Special),
            Move::Special => Some(Move::Kick),
            Move::Kick => Some(Move::Block),
            Move::Block => Some(Move::Punch),
            Move::Stunned => None,
        }
    }

    /// Does `self` beat `other`? A live move always beats stunned.
    pub fn beats(self, other: Move) -> bool {
        if self == Move::Stunned {
            return false;
        }
        other == Move::Stunned || self.beats_move() == Some(other)
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Move {
    type Err = MoveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stunned" | "none" => Ok(Move::Stunned),
            "punch" => Ok(Move::Punch),
            "kick" => Ok(Move::Kick),
            "block" => Ok(Move::Block),
            "special" => Ok(Move::Special),
            _ => Err(MoveError::UnknownName(s.to_string())),
        }
    }
}

/// A validated ten-move plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Move>", into = "Vec<Move>")]
pub struct MovePlan([Move; PLAN_LENGTH]);

impl MovePlan {
    /// Build from an exact array.
    pub const fn new(moves: [Move; PLAN_LENGTH]) -> Self {
        Self(moves)
    }

    /// Ten copies of the same move.
    pub const fn repeat(mv: Move) -> Self {
        Self([mv; PLAN_LENGTH])
    }

    /// The plan synthesized for a player who cannot act.
    pub const fn forced_stun() -> Self {
        Self::repeat(Move::Stunned)
    }

    /// Validate a slice of moves.
    pub fn from_slice(moves: &[Move]) -> Result<Self, MoveError> {
        let array: [Move; PLAN_LENGTH] = moves.try_into().map_err(|_| MoveError::WrongPlanLength {
            expected: PLAN_LENGTH,
            got: moves.len(),
        })?;
        Ok(Self(array))
    }

    /// Validate commitment codes.
    pub fn from_codes(codes: &[u8]) -> Result<Self, MoveError> {
        if codes.len() != PLAN_LENGTH {
            return Err(MoveError::WrongPlanLength {
                expected: PLAN_LENGTH,
                got: codes.len(),
            });
        }
        let moves = codes
            .iter()
            .map(|c| Move::from_code(*c))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_slice(&moves)
    }

    /// Parse wire names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, MoveError> {
        let moves = names
            .iter()
            .map(|n| n.as_ref().parse::<Move>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_slice(&moves)
    }

    /// Move for a 1-based turn within the plan.
    pub fn at_turn(&self, turn: u32) -> Option<Move> {
        let index = (turn as usize).checked_sub(1)?;
        self.0.get(index).copied()
    }

    /// Commitment codes in order.
    pub fn codes(&self) -> [u8; PLAN_LENGTH] {
        self.0.map(Move::code)
    }

    /// Borrow the moves.
    pub fn moves(&self) -> &[Move; PLAN_LENGTH] {
        &self.0
    }

    /// First move of the plan.
    pub fn head(&self) -> Move {
        self.0[0]
    }
}

impl TryFrom<Vec<Move>> for MovePlan {
    type Error = MoveError;

    fn try_from(value: Vec<Move>) -> Result<Self, Self::Error> {
        Self::from_slice(&value)
    }
}

impl From<MovePlan> for Vec<Move> {
    fn from(plan: MovePlan) -> Self {
        plan.0.to_vec()
    }
}
