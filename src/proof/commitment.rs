//! Round Commitment
//!
//! Bind a hidden ten-move plan to a single BN254 field element before the
//! round starts. Reveal later and recompute to prove nothing changed.
//!
//! ## Layout
//!
//! ```text
//! header     = Poseidon6(matchField, round, turn, playerField, surgeCode, nonce)
//! moves      = Poseidon10(move_0 .. move_9)
//! commitment = Poseidon2(header, moves)
//! ```
//!
//! `matchField` and `playerField` are `hash_to_field` of the match id and
//! player address. Poseidon uses the circom parameters, so a circuit built
//! with circomlib reproduces the same value.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::field::{hash_to_field, FieldElement};
use crate::game::moves::{MoveError, MovePlan, PLAN_LENGTH};
use crate::game::playback::MAX_TURNS;
use crate::game::surge::{SurgeCard, SurgeError};

/// Errors computing a commitment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    /// Bad move code or plan length.
    #[error(transparent)]
    Move(#[from] MoveError),
    /// Bad surge selector.
    #[error(transparent)]
    Surge(#[from] SurgeError),
    /// Round must be >= 1.
    #[error("round {0} out of range")]
    RoundOutOfRange(u32),
    /// Turn must be in 1..=10.
    #[error("turn {0} out of range")]
    TurnOutOfRange(u32),
    /// Poseidon parameter or input failure.
    #[error("poseidon: {0}")]
    Hash(String),
}

/// Everything a commitment binds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentOpening {
    /// Match identifier.
    pub match_id: String,
    /// Round number (>= 1).
    pub round: u32,
    /// Turn at commit time (1..=10).
    pub turn: u32,
    /// Player address.
    pub player: String,
    /// Selected surge card, if any.
    pub surge: Option<SurgeCard>,
    /// Secret nonce (the transcript value).
    pub nonce: FieldElement,
    /// The hidden plan.
    pub plan: MovePlan,
}

impl CommitmentOpening {
    /// Compute the commitment for this opening.
    pub fn commit(&self) -> Result<FieldElement, CommitmentError> {
        compute_commitment(
            &self.match_id,
            self.round,
            self.turn,
            &self.player,
            SurgeCard::selector(self.surge),
            &self.nonce,
            &self.plan.codes(),
        )
    }

    /// Does this opening reproduce `commitment`?
    pub fn opens(&self, commitment: &FieldElement) -> Result<bool, CommitmentError> {
        Ok(self.commit()? == *commitment)
    }
}

/// Compute a commitment from raw codes.
///
/// Validates move codes, plan length, surge selector and round/turn range
/// before hashing.
pub fn compute_commitment(
    match_id: &str,
    round: u32,
    turn: u32,
    player: &str,
    surge_code: u8,
    nonce: &FieldElement,
    move_codes: &[u8],
) -> Result<FieldElement, CommitmentError> {
    if round == 0 {
        return Err(CommitmentError::RoundOutOfRange(round));
    }
    if turn == 0 || turn > MAX_TURNS {
        return Err(CommitmentError::TurnOutOfRange(turn));
    }
    if surge_code != 0 {
        SurgeCard::from_code(surge_code)?;
    }
    let plan = MovePlan::from_codes(move_codes)?;

    let header = [
        hash_to_field(match_id.as_bytes()).to_fr(),
        Fr::from(u64::from(round)),
        Fr::from(u64::from(turn)),
        hash_to_field(player.as_bytes()).to_fr(),
        Fr::from(u64::from(surge_code)),
        nonce.to_fr(),
    ];
    let moves: Vec<Fr> = plan.codes().iter().map(|c| Fr::from(u64::from(*c))).collect();
    debug_assert_eq!(moves.len(), PLAN_LENGTH);

    let header_hash = poseidon(&header)?;
    let moves_hash = poseidon(&moves)?;
    let commitment = poseidon(&[header_hash, moves_hash])?;

    Ok(FieldElement::from_fr(commitment))
}

fn poseidon(inputs: &[Fr]) -> Result<Fr, CommitmentError> {
    let mut hasher =
        Poseidon::<Fr>::new_circom(inputs.len()).map_err(|e| CommitmentError::Hash(e.to_string()))?;
    hasher.hash(inputs).map_err(|e| CommitmentError::Hash(e.to_string()))
}
