//! Protocol Errors
//!
//! Every rejection the round service can return, each tagged with a status
//! class so the gateway can tell bad input from a state conflict. Lock
//! contention and "already resolved" are not here: they are successful
//! responses.

use thiserror::Error;

use crate::core::field::FieldError;
use crate::game::moves::MoveError;
use crate::game::surge::SurgeError;
use crate::proof::commitment::CommitmentError;
use crate::proof::oracle::OracleError;
use crate::proof::plan::PlanError;
use crate::proof::public_inputs::PublicInputsError;

use super::store::StoreError;

/// Status class of a protocol rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed input or rejected proof.
    BadRequest,
    /// Caller is not a participant.
    Forbidden,
    /// Unknown match.
    NotFound,
    /// State or binding conflict.
    Conflict,
    /// A collaborator stayed unavailable after retries.
    Unavailable,
    /// Storage or encoding failure.
    Internal,
}

impl ErrorClass {
    /// HTTP-style status code.
    pub const fn status_code(self) -> u16 {
        match self {
            ErrorClass::BadRequest => 400,
            ErrorClass::Forbidden => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Unavailable => 503,
            ErrorClass::Internal => 500,
        }
    }
}

/// Commit/reveal rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Input failed local validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller is not seated in this match.
    #[error("{address} is not a participant in match {match_id}")]
    NotParticipant {
        /// Match identifier.
        match_id: String,
        /// Caller.
        address: String,
    },

    /// No such match.
    #[error("match {0} not found")]
    MatchNotFound(String),

    /// A match with this id already exists.
    #[error("match {0} already exists")]
    MatchExists(String),

    /// Match is not accepting moves.
    #[error("match {0} is not in progress")]
    MatchNotInProgress(String),

    /// Request names a different round than the one being played.
    #[error("round mismatch: expected {expected}, got {got}")]
    RoundMismatch {
        /// Current round.
        expected: u32,
        /// Requested round.
        got: u32,
    },

    /// Request names a different turn than the one the round opened at.
    #[error("turn mismatch: expected {expected}, got {got}")]
    TurnMismatch {
        /// Expected turn.
        expected: u32,
        /// Requested turn.
        got: u32,
    },

    /// Public inputs are bound to a different commitment.
    #[error("commitment mismatch: public inputs bind {bound}, request carries {commitment}")]
    CommitmentMismatch {
        /// Commitment in the request.
        commitment: String,
        /// Commitment inside the public inputs.
        bound: String,
    },

    /// Revealed plan does not reproduce the stored commitment.
    #[error("revealed plan does not open the stored commitment")]
    BindingMismatch,

    /// Revealed transcript differs from the one stored at commit.
    #[error("transcript mismatch")]
    TranscriptMismatch,

    /// Revealed public inputs differ from the ones stored at commit.
    #[error("public inputs differ from commit-time inputs")]
    PublicInputsMismatch,

    /// The proof oracle returned a rejection.
    #[error("proof rejected by {backend}")]
    ProofRejected {
        /// Backend that rejected.
        backend: String,
    },

    /// This side already revealed for the round.
    #[error("already revealed for round {0}")]
    AlreadyRevealed(u32),

    /// The round's row for this side was synthesized by the server.
    #[error("side was auto-committed as stunned for round {0}")]
    ForcedCommit(u32),

    /// The oracle could not be reached after retries.
    #[error("proof oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Strict mode refuses this configuration.
    #[error("strict mode: {0}")]
    StrictModeRefused(String),

    /// Write to a resolved row.
    #[error("round {round} of match {match_id} is already resolved")]
    Immutable {
        /// Match identifier.
        match_id: String,
        /// Round.
        round: u32,
    },

    /// Storage failure.
    #[error("store: {0}")]
    Store(String),

    /// Encoding failure while resolving.
    #[error("internal: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Status class.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProtocolError::InvalidInput(_) | ProtocolError::ProofRejected { .. } => ErrorClass::BadRequest,
            ProtocolError::NotParticipant { .. } => ErrorClass::Forbidden,
            ProtocolError::MatchNotFound(_) => ErrorClass::NotFound,
            ProtocolError::MatchExists(_)
            | ProtocolError::MatchNotInProgress(_)
            | ProtocolError::RoundMismatch { .. }
            | ProtocolError::TurnMismatch { .. }
            | ProtocolError::CommitmentMismatch { .. }
            | ProtocolError::BindingMismatch
            | ProtocolError::TranscriptMismatch
            | ProtocolError::PublicInputsMismatch
            | ProtocolError::AlreadyRevealed(_)
            | ProtocolError::ForcedCommit(_)
            | ProtocolError::Immutable { .. } => ErrorClass::Conflict,
            ProtocolError::OracleUnavailable(_) => ErrorClass::Unavailable,
            ProtocolError::StrictModeRefused(_) | ProtocolError::Store(_) | ProtocolError::Internal(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Status code of the class.
    pub fn status_code(&self) -> u16 {
        self.class().status_code()
    }
}

impl From<StoreError> for ProtocolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Immutable { match_id, round } => ProtocolError::Immutable { match_id, round },
            other => ProtocolError::Store(other.to_string()),
        }
    }
}

impl From<OracleError> for ProtocolError {
    fn from(err: OracleError) -> Self {
        ProtocolError::OracleUnavailable(err.to_string())
    }
}

impl From<FieldError> for ProtocolError {
    fn from(err: FieldError) -> Self {
        ProtocolError::InvalidInput(err.to_string())
    }
}

impl From<MoveError> for ProtocolError {
    fn from(err: MoveError) -> Self {
        ProtocolError::InvalidInput(err.to_string())
    }
}

impl From<SurgeError> for ProtocolError {
    fn from(err: SurgeError) -> Self {
        ProtocolError::InvalidInput(err.to_string())
    }
}

impl From<CommitmentError> for ProtocolError {
    fn from(err: CommitmentError) -> Self {
        ProtocolError::InvalidInput(err.to_string())
    }
}

impl From<PlanError> for ProtocolError {
    fn from(err: PlanError) -> Self {
        ProtocolError::InvalidInput(err.to_string())
    }
}

impl From<PublicInputsError> for ProtocolError {
    fn from(err: PublicInputsError) -> Self {
        ProtocolError::InvalidInput(err.to_string())
    }
}
