//! Game Logic Module
//!
//! Combat rules and round playback. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `moves`: Move enumeration, codes and ten-move plans
//! - `surge`: Per-round surge cards and their modifiers
//! - `combat`: Single-turn resolution
//! - `state`: Match record, fighter meters, carry-over state
//! - `playback`: Ten-turn round loop with stun carry-over

pub mod moves;
pub mod surge;
pub mod combat;
pub mod state;
pub mod playback;

// Re-export key types
pub use moves::{Move, MovePlan, MoveError, PLAN_LENGTH};
pub use surge::{SurgeCard, SurgeModifiers, SurgeError};
pub use combat::{resolve_turn, MoveOutcome, TurnOutcome};
pub use state::{CombatState, FighterState, MatchFormat, MatchRecord, MatchStatus, Side};
pub use playback::{RoundEnding, RoundSummary, Standing, TurnPlayback, TurnRecord, MAX_TURNS};
