//! Commit-Reveal Round Service
//!
//! Drives one round of a match through
//!
//! ```text
//! AwaitingCommits -> BothCommitted -> AwaitingReveals -> BothRevealed -> Resolving -> Resolved
//! ```
//!
//! Phases are never stored. They are derived from the commit rows, the lock
//! row and the resolved-round row, so every step can be re-entered after a
//! crash or a retried request.
//!
//! Commit binds a sealed plan to a commitment and verifies its proof. Reveal
//! opens the commitment with the stored nonce; a plan that does not reproduce
//! the stored commitment is rejected whatever the proof says. Once both sides
//! have revealed, exactly one caller wins the resolution lock and plays the
//! round out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ProtocolConfig, RevealVerification};
use crate::core::backoff::retry;
use crate::core::field::FieldElement;
use crate::core::hash::resolution_digest;
use crate::game::moves::{Move, MovePlan};
use crate::game::playback::{RoundEnding, Standing, TurnPlayback, TurnRecord, MAX_TURNS};
use crate::game::state::{CombatState, FighterState, MatchFormat, MatchRecord, MatchStatus, Side};
use crate::game::surge::SurgeCard;
use crate::proof::commitment::CommitmentOpening;
use crate::proof::oracle::{OracleVerdict, ProofOracle, VerificationContext, BACKEND_DISABLED};
use crate::proof::plan::{PlanError, PlanPayload, SealedPlan};
use crate::proof::public_inputs::PublicInputs;

use super::anchor::{AnchorJob, AnchorQueue};
use super::error::ProtocolError;
use super::events::{EventKind, EventSink};
use super::lock::{LockOutcome, ResolutionLock};
use super::store::{ResolvedRound, RevealRecord, RoundCommit, RoundStore};

// =============================================================================
// REQUESTS / RESPONSES
// =============================================================================

/// Commit a sealed plan for the current round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Match identifier.
    pub match_id: String,
    /// Committing address.
    pub address: String,
    /// Round being committed.
    pub round: u32,
    /// Turn the round opens at.
    pub turn: u32,
    /// Poseidon commitment.
    pub commitment: FieldElement,
    /// Hex-encoded proof.
    #[serde(default)]
    pub proof: String,
    /// Proof public inputs; element 0 must equal `commitment`.
    pub public_inputs: PublicInputs,
    /// Secret nonce.
    pub transcript_hash: FieldElement,
    /// Sealed plan payload.
    pub encrypted_plan: SealedPlan,
}

/// Open a previously committed plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRequest {
    /// Match identifier.
    pub match_id: String,
    /// Revealing address.
    pub address: String,
    /// Round being revealed.
    pub round: u32,
    /// Turn the round opened at.
    pub turn: u32,
    /// Move for `turn`; must match the plan.
    #[serde(rename = "move")]
    pub current_move: Move,
    /// Full plan. Length is checked here, not at the wire.
    pub move_plan: Vec<Move>,
    /// Surge selection.
    #[serde(default)]
    pub surge_card_id: Option<SurgeCard>,
    /// Hex-encoded proof.
    #[serde(default)]
    pub proof: String,
    /// Public inputs, if re-sent.
    #[serde(default)]
    pub public_inputs: Option<PublicInputs>,
    /// Nonce used at commit.
    pub transcript_hash: FieldElement,
    /// Client's predicted winner address. Logged on mismatch, never trusted.
    #[serde(default)]
    pub expected_winner: Option<String>,
}

/// Authoritative outcome of a resolved round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Id linking commit rows, lock and resolved-round row.
    pub resolved_round_id: Uuid,
    /// Match identifier.
    pub match_id: String,
    /// Round number.
    pub round: u32,
    /// How the round ended.
    pub ending: RoundEnding,
    /// Round winner.
    pub winner: Option<Side>,
    /// Round winner's address.
    pub winner_address: Option<String>,
    /// Turn-by-turn outcomes.
    pub turns: Vec<TurnRecord>,
    /// Meters after the last turn.
    pub fighters: [FighterState; 2],
    /// Round wins after this round.
    pub rounds_won: [u32; 2],
    /// Did this round finish the match?
    pub match_over: bool,
    /// Match winner, if finished.
    pub match_winner: Option<Side>,
    /// Hex SHA-256 resolution digest.
    pub digest: String,
}

/// Successful commit/reveal outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RoundResponse {
    /// Both sides have committed.
    BothCommitted,
    /// Waiting on the other side.
    AwaitingOpponent,
    /// Another caller is resolving; poll again.
    AwaitingResolver,
    /// Round was resolved already.
    AlreadyResolved {
        /// Id of the resolution.
        #[serde(rename = "resolvedRoundId")]
        resolved_round_id: Uuid,
    },
    /// This call resolved the round.
    Resolution(Box<Resolution>),
}

/// Derived round phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundPhase {
    /// At least one side has not committed.
    AwaitingCommits,
    /// Both committed, nobody revealed.
    BothCommitted,
    /// One side revealed.
    AwaitingReveals,
    /// Both revealed, no resolver running.
    BothRevealed,
    /// A resolver holds the lock.
    Resolving,
    /// Done.
    Resolved,
}

/// Read-only view of a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStatus {
    /// Match identifier.
    pub match_id: String,
    /// Round number.
    pub round: u32,
    /// Derived phase.
    pub phase: RoundPhase,
    /// Commit present per seat.
    pub committed: [bool; 2],
    /// Reveal present per seat.
    pub revealed: [bool; 2],
    /// Resolution id, once resolved.
    pub resolved_round_id: Option<Uuid>,
}

/// What a deadline sweep did for one match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutReport {
    /// Match identifier.
    pub match_id: String,
    /// Round inspected (0 if none).
    pub round: u32,
    /// Seats that were auto-committed as stunned.
    pub forced: Vec<Side>,
    /// Progress after forcing, if anything was forced.
    pub response: Option<RoundResponse>,
}

impl TimeoutReport {
    fn idle(match_id: &str, round: u32) -> Self {
        Self {
            match_id: match_id.to_string(),
            round,
            forced: Vec::new(),
            response: None,
        }
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Commit-reveal state machine over a store and a proof oracle.
pub struct RoundService<S, O> {
    store: Arc<S>,
    oracle: O,
    lock: ResolutionLock<S>,
    events: Arc<dyn EventSink>,
    anchor: AnchorQueue,
    config: ProtocolConfig,
}

impl<S: RoundStore, O: ProofOracle> RoundService<S, O> {
    /// Build the service. Strict mode refuses any oracle that does not verify
    /// proofs cryptographically, and any anchor that is not a ledger.
    pub fn new(
        store: Arc<S>,
        oracle: O,
        events: Arc<dyn EventSink>,
        anchor: AnchorQueue,
        config: ProtocolConfig,
    ) -> Result<Self, ProtocolError> {
        let disabled = config.verification_disabled || oracle.backend() == BACKEND_DISABLED;
        if config.is_strict() {
            if disabled {
                return Err(ProtocolError::StrictModeRefused("proof verification is disabled".into()));
            }
            if !oracle.is_sound() {
                return Err(ProtocolError::StrictModeRefused(format!(
                    "proof backend {} does not verify proofs",
                    oracle.backend()
                )));
            }
            if !anchor.is_ledger_backed() {
                return Err(ProtocolError::StrictModeRefused(
                    "no ledger anchoring collaborator is configured".into(),
                ));
            }
        } else if disabled {
            warn!("Proof verification disabled; every proof will be accepted");
        }

        let lock = ResolutionLock::new(store.clone(), config.lock_stale_after());
        Ok(Self {
            store,
            oracle,
            lock,
            events,
            anchor,
            config,
        })
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Match lifecycle
    // -------------------------------------------------------------------------

    /// Register a match in character select.
    pub async fn create_match(
        &self,
        match_id: &str,
        player1: &str,
        player2: &str,
        format: MatchFormat,
        now: DateTime<Utc>,
    ) -> Result<MatchRecord, ProtocolError> {
        let (match_id, player1, player2) = (match_id.trim(), player1.trim(), player2.trim());
        if match_id.is_empty() || player1.is_empty() || player2.is_empty() {
            return Err(ProtocolError::InvalidInput("match id and players are required".into()));
        }
        if player1 == player2 {
            return Err(ProtocolError::InvalidInput("a player cannot fight themselves".into()));
        }
        if self.store.get_match(match_id).await?.is_some() {
            return Err(ProtocolError::MatchExists(match_id.to_string()));
        }

        let record = MatchRecord::new(match_id, player1, player2, format, now);
        self.store.put_match(record.clone()).await?;
        info!("Created match {} ({:?})", match_id, format);
        Ok(record)
    }

    /// Move a match into play and open round 1. Idempotent once started.
    pub async fn start_match(&self, match_id: &str, now: DateTime<Utc>) -> Result<MatchRecord, ProtocolError> {
        let mut record = self.load_match(match_id).await?;
        match record.status {
            MatchStatus::InProgress => return Ok(record),
            MatchStatus::Completed => return Err(ProtocolError::MatchNotInProgress(match_id.to_string())),
            MatchStatus::CharacterSelect => {}
        }

        record.status = MatchStatus::InProgress;
        record.move_deadline = Some(now + self.config.move_timeout());
        self.store.put_combat_state(CombatState::new(match_id)).await?;
        self.store.put_match(record.clone()).await?;

        info!("Match {} started", match_id);
        self.events.emit(
            match_id,
            EventKind::MatchStarted,
            json!({
                "player1": record.player1,
                "player2": record.player2,
                "format": record.format,
                "round": 1,
                "moveDeadline": record.move_deadline,
            }),
        );
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Commit
    // -------------------------------------------------------------------------

    /// Accept a commitment for the caller's seat.
    #[instrument(skip_all, fields(match_id = %req.match_id, round = req.round, address = %req.address))]
    pub async fn commit(&self, req: CommitRequest, now: DateTime<Utc>) -> Result<RoundResponse, ProtocolError> {
        // Local validation. Nothing below here runs for malformed input.
        if req.round == 0 || req.turn == 0 || req.turn > MAX_TURNS {
            return Err(ProtocolError::InvalidInput(format!(
                "round {} turn {} out of range",
                req.round, req.turn
            )));
        }
        if req.commitment.is_zero() {
            return Err(ProtocolError::InvalidInput("zero commitment is reserved".into()));
        }
        let bound = req.public_inputs.bound_commitment();
        if *bound != req.commitment {
            debug!("public inputs bind {} but commitment is {}", bound, req.commitment);
            return Err(ProtocolError::CommitmentMismatch {
                commitment: req.commitment.to_hex(),
                bound: bound.to_hex(),
            });
        }
        let payload = req.encrypted_plan.open()?;
        payload.check_turn(req.turn)?;
        let proof = decode_proof(&req.proof)?;

        let (record, side) = self.load_participant(&req.match_id, &req.address).await?;
        if record.status != MatchStatus::InProgress {
            return Err(ProtocolError::MatchNotInProgress(record.id));
        }
        let combat = self.load_combat(&req.match_id).await?;
        if req.round != combat.round {
            return Err(ProtocolError::RoundMismatch {
                expected: combat.round,
                got: req.round,
            });
        }
        if req.turn != combat.turn {
            return Err(ProtocolError::TurnMismatch {
                expected: combat.turn,
                got: req.turn,
            });
        }

        // A stunned seat has no choice this round; its plan is always forced.
        if combat.is_stunned(side) {
            self.force_stunned(&record, req.round, combat.turn, side, "stunned", now)
                .await?;
            debug!("{} is stunned, refusing its own plan", side.label());
            return Err(ProtocolError::ForcedCommit(req.round));
        }

        if let Some(existing) = self.store.commit(&req.match_id, req.round, side).await? {
            if existing.is_resolved() {
                return Err(ProtocolError::Immutable {
                    match_id: record.id,
                    round: req.round,
                });
            }
            if existing.forced {
                return Err(ProtocolError::ForcedCommit(req.round));
            }
            if existing.is_revealed() {
                return Err(ProtocolError::AlreadyRevealed(req.round));
            }
            debug!("{} replacing unrevealed commit", side.label());
        }

        let player = record.address(side).to_string();
        let verdict = if self.config.defer_commit_verify {
            debug!("commit-time verification deferred to reveal");
            None
        } else {
            let context = VerificationContext {
                match_id: record.id.clone(),
                player: player.clone(),
                round: req.round,
                turn: req.turn,
            };
            Some(self.verify_proof("commit", &proof, &req.public_inputs, &context).await?)
        };

        let row = RoundCommit {
            match_id: record.id.clone(),
            round: req.round,
            side,
            player: player.clone(),
            turn: req.turn,
            commitment: req.commitment,
            sealed_plan: req.encrypted_plan,
            transcript_hash: req.transcript_hash,
            public_inputs: Some(req.public_inputs),
            verified_at: verdict.as_ref().map(|_| now),
            verified_backend: verdict.as_ref().map(|v| v.backend.clone()),
            forced: false,
            reveal: None,
            resolved_round_id: None,
            created_at: now,
        };
        self.store.upsert_commit(row).await?;
        info!("{} committed for match {} round {}", side.label(), record.id, req.round);

        self.anchor.enqueue(AnchorJob::Commitment {
            match_id: record.id.clone(),
            round: req.round,
            player: player.clone(),
            commitment: req.commitment,
        });
        if let Some(verdict) = &verdict {
            self.anchor.enqueue(AnchorJob::Verification {
                match_id: record.id.clone(),
                round: req.round,
                player,
                backend: verdict.backend.clone(),
            });
        }
        self.events.emit(
            &record.id,
            EventKind::PlayerCommitted,
            json!({ "round": req.round, "player": side, "verified": verdict.is_some() }),
        );

        let opponent = side.opponent();
        if combat.is_stunned(opponent) {
            self.force_stunned(&record, req.round, combat.turn, opponent, "stunned", now)
                .await?;
        }

        self.commit_progress(&record.id, req.round).await
    }

    // -------------------------------------------------------------------------
    // Reveal
    // -------------------------------------------------------------------------

    /// Open the caller's commitment. Resolves the round when both sides are in.
    #[instrument(skip_all, fields(match_id = %req.match_id, round = req.round, address = %req.address))]
    pub async fn reveal(&self, req: RevealRequest, now: DateTime<Utc>) -> Result<RoundResponse, ProtocolError> {
        let plan = MovePlan::from_slice(&req.move_plan)?;
        let planned = plan
            .at_turn(req.turn)
            .ok_or_else(|| ProtocolError::InvalidInput(format!("turn {} out of range", req.turn)))?;
        if planned != req.current_move {
            return Err(PlanError::MoveMismatch {
                turn: req.turn,
                declared: req.current_move,
                planned,
            }
            .into());
        }
        let proof = decode_proof(&req.proof)?;

        let (record, side) = self.load_participant(&req.match_id, &req.address).await?;
        let mut row = match self.store.commit(&record.id, req.round, side).await? {
            Some(row) if !row.is_resolved() => row,
            _ => return self.absent_commit_response(&record.id, req.round).await,
        };
        if row.forced {
            return Err(ProtocolError::ForcedCommit(req.round));
        }
        if req.turn != row.turn {
            return Err(ProtocolError::TurnMismatch {
                expected: row.turn,
                got: req.turn,
            });
        }
        if let Some(existing) = &row.reveal {
            if existing.plan == plan && existing.surge == req.surge_card_id {
                debug!("{} re-sent its reveal", side.label());
                return self
                    .reveal_progress(&record.id, req.round, req.expected_winner.as_deref(), now)
                    .await;
            }
            return Err(ProtocolError::AlreadyRevealed(req.round));
        }

        let opening = CommitmentOpening {
            match_id: row.match_id.clone(),
            round: row.round,
            turn: row.turn,
            player: row.player.clone(),
            surge: req.surge_card_id,
            nonce: row.transcript_hash,
            plan,
        };
        if !opening.opens(&row.commitment)? {
            warn!("{} reveal does not open its commitment", side.label());
            return Err(ProtocolError::BindingMismatch);
        }
        if req.transcript_hash != row.transcript_hash {
            warn!("{} reveal carries a different transcript", side.label());
            return Err(ProtocolError::TranscriptMismatch);
        }
        if let (Some(revealed), Some(stored)) = (&req.public_inputs, &row.public_inputs) {
            if revealed != stored {
                return Err(ProtocolError::PublicInputsMismatch);
            }
        }

        let inputs = req
            .public_inputs
            .clone()
            .or_else(|| row.public_inputs.clone())
            .unwrap_or_else(|| PublicInputs::commitment_only(row.commitment));
        if *inputs.bound_commitment() != row.commitment {
            return Err(ProtocolError::CommitmentMismatch {
                commitment: row.commitment.to_hex(),
                bound: inputs.bound_commitment().to_hex(),
            });
        }

        let opponent_unverified = self
            .store
            .commit(&record.id, req.round, side.opponent())
            .await?
            .is_some_and(|o| !o.forced && o.verified_at.is_none());
        let must_verify = self.config.reveal_verify == RevealVerification::Always
            || row.verified_at.is_none()
            || (self.config.is_strict() && opponent_unverified);

        if must_verify {
            let context = VerificationContext {
                match_id: row.match_id.clone(),
                player: row.player.clone(),
                round: row.round,
                turn: row.turn,
            };
            let verdict = self.verify_proof("reveal", &proof, &inputs, &context).await?;
            row.verified_at = Some(now);
            row.verified_backend = Some(verdict.backend.clone());
            self.anchor.enqueue(AnchorJob::Verification {
                match_id: row.match_id.clone(),
                round: row.round,
                player: row.player.clone(),
                backend: verdict.backend,
            });
        }

        row.reveal = Some(RevealRecord {
            plan,
            surge: req.surge_card_id,
            revealed_at: now,
        });
        self.store.upsert_commit(row).await?;
        info!("{} revealed for match {} round {}", side.label(), record.id, req.round);
        self.events.emit(
            &record.id,
            EventKind::PlayerRevealed,
            json!({ "round": req.round, "player": side, "reverified": must_verify }),
        );

        self.reveal_progress(&record.id, req.round, req.expected_winner.as_deref(), now)
            .await
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Become the resolver for a fully revealed round and play it out.
    ///
    /// Concurrent callers get `AwaitingResolver` while a fresh lock is held
    /// and `AlreadyResolved` once it has been released with a result.
    #[instrument(skip(self, expected_winner, now))]
    pub async fn try_resolve(
        &self,
        match_id: &str,
        round: u32,
        expected_winner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RoundResponse, ProtocolError> {
        let rows = self.store.round_commits(match_id, round).await?;
        if let Some(resolved_round_id) = rows.iter().find_map(|r| r.resolved_round_id) {
            return Ok(RoundResponse::AlreadyResolved { resolved_round_id });
        }
        let Some((plans, surge)) = revealed_plans(&rows) else {
            return Ok(RoundResponse::AwaitingOpponent);
        };

        let owner = Uuid::new_v4();
        match self.lock.acquire(match_id, round, owner, now).await? {
            LockOutcome::Acquired => {}
            LockOutcome::InProgress => {
                debug!("round {} of match {} is being resolved elsewhere", round, match_id);
                return Ok(RoundResponse::AwaitingResolver);
            }
            LockOutcome::AlreadyResolved { resolved_round_id } => {
                return Ok(RoundResponse::AlreadyResolved { resolved_round_id });
            }
        }

        // A previous holder may have finished playback before stalling.
        if let Some(done) = self.store.resolved_round(match_id, round).await? {
            self.apply_resolution(&done, now).await?;
            self.release(match_id, round, owner, done.id).await?;
            return Ok(RoundResponse::AlreadyResolved {
                resolved_round_id: done.id,
            });
        }

        let record = self.load_match(match_id).await?;
        let combat = self.load_combat(match_id).await?;
        if combat.round != round {
            return Err(ProtocolError::Internal(format!(
                "combat state is at round {} while resolving round {}",
                combat.round, round
            )));
        }

        let standing = Standing {
            rounds_won: record.rounds_won,
            format: record.format,
        };
        let mut playback = TurnPlayback::new(combat, plans, surge, standing);
        while let Some(turn) = playback.step() {
            self.store.append_turn(turn).await?;
        }
        let summary = playback.finish();

        let digest = resolution_digest(match_id, round, &summary.turns)
            .map_err(|e| ProtocolError::Internal(format!("resolution digest: {}", e)))?;
        let candidate = ResolvedRound {
            id: Uuid::new_v4(),
            match_id: match_id.to_string(),
            round,
            ending: summary.ending,
            winner: summary.winner,
            turns_played: summary.turns.len() as u32,
            digest,
            final_state: summary.state.clone(),
            resolved_at: now,
        };
        self.store.put_resolved_round(candidate.clone()).await?;
        // First write wins; a stolen lock may have raced us here.
        let resolved = self
            .store
            .resolved_round(match_id, round)
            .await?
            .unwrap_or(candidate);

        let record = self.apply_resolution(&resolved, now).await?;
        let held = self.release(match_id, round, owner, resolved.id).await?;

        let winner_address = resolved.winner.map(|side| record.address(side).to_string());
        let digest_hex = hex::encode(resolved.digest);
        info!(
            "Match {} round {} resolved: {:?}, winner {:?} after {} turns",
            match_id, round, resolved.ending, resolved.winner, resolved.turns_played
        );
        // A resolver that lost its lock stays quiet; the new holder announces.
        if held {
            self.announce(match_id, &resolved, &record, &summary.turns, &digest_hex);
        }

        if let Some(expected) = expected_winner {
            if winner_address.as_deref() != Some(expected.trim()) {
                warn!(
                    expected,
                    actual = ?winner_address,
                    "client expected a different round winner"
                );
            }
        }

        Ok(RoundResponse::Resolution(Box::new(Resolution {
            resolved_round_id: resolved.id,
            match_id: match_id.to_string(),
            round,
            ending: resolved.ending,
            winner: resolved.winner,
            winner_address,
            turns: summary.turns,
            fighters: resolved.final_state.fighters,
            rounds_won: record.rounds_won,
            match_over: record.is_completed(),
            match_winner: record.winner,
            digest: digest_hex,
        })))
    }

    // -------------------------------------------------------------------------
    // Deadlines
    // -------------------------------------------------------------------------

    /// Force stunned commits for seats that missed the move deadline.
    #[instrument(skip(self, now))]
    pub async fn expire_deadline(&self, match_id: &str, now: DateTime<Utc>) -> Result<TimeoutReport, ProtocolError> {
        let record = self.load_match(match_id).await?;
        if record.status != MatchStatus::InProgress {
            return Ok(TimeoutReport::idle(match_id, 0));
        }
        let combat = self.load_combat(match_id).await?;
        let round = combat.round;
        match record.move_deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Ok(TimeoutReport::idle(match_id, round)),
        }

        let rows = self.store.round_commits(match_id, round).await?;
        if rows.iter().any(RoundCommit::is_resolved) {
            return Ok(TimeoutReport::idle(match_id, round));
        }

        let mut forced = Vec::new();
        for side in Side::BOTH {
            if rows.iter().any(|r| r.side == side) {
                continue;
            }
            if self
                .force_stunned(&record, round, combat.turn, side, "timeout", now)
                .await?
            {
                forced.push(side);
            }
        }
        if forced.is_empty() {
            return Ok(TimeoutReport::idle(match_id, round));
        }
        warn!("Move deadline passed in match {} round {}: forced {:?}", match_id, round, forced);

        let response = match self.commit_progress(match_id, round).await? {
            RoundResponse::BothCommitted => self.reveal_progress(match_id, round, None, now).await?,
            other => other,
        };
        Ok(TimeoutReport {
            match_id: match_id.to_string(),
            round,
            forced,
            response: Some(response),
        })
    }

    /// Run `expire_deadline` over every in-progress match. Per-match failures
    /// are logged and skipped.
    pub async fn sweep_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<TimeoutReport>, ProtocolError> {
        let mut reports = Vec::new();
        for record in self.store.matches_with_status(MatchStatus::InProgress).await? {
            match self.expire_deadline(&record.id, now).await {
                Ok(report) if !report.forced.is_empty() => reports.push(report),
                Ok(_) => {}
                Err(e) => warn!("Deadline sweep failed for match {}: {}", record.id, e),
            }
        }
        Ok(reports)
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Derived phase and per-seat flags. Never writes.
    pub async fn round_status(&self, match_id: &str, round: u32) -> Result<RoundStatus, ProtocolError> {
        self.load_match(match_id).await?;
        let rows = self.store.round_commits(match_id, round).await?;

        let mut committed = [false; 2];
        let mut revealed = [false; 2];
        for row in &rows {
            committed[row.side.index()] = true;
            revealed[row.side.index()] = row.is_revealed();
        }

        let resolved_round_id = match rows.iter().find_map(|r| r.resolved_round_id) {
            Some(id) => Some(id),
            None => self.store.resolved_round(match_id, round).await?.map(|r| r.id),
        };

        let phase = if resolved_round_id.is_some() {
            RoundPhase::Resolved
        } else if revealed == [true, true] {
            if self.lock.holder(match_id, round).await?.is_some() {
                RoundPhase::Resolving
            } else {
                RoundPhase::BothRevealed
            }
        } else if committed == [true, true] {
            if revealed.contains(&true) {
                RoundPhase::AwaitingReveals
            } else {
                RoundPhase::BothCommitted
            }
        } else {
            RoundPhase::AwaitingCommits
        };

        Ok(RoundStatus {
            match_id: match_id.to_string(),
            round,
            phase,
            committed,
            revealed,
            resolved_round_id,
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn load_match(&self, match_id: &str) -> Result<MatchRecord, ProtocolError> {
        self.store
            .get_match(match_id)
            .await?
            .ok_or_else(|| ProtocolError::MatchNotFound(match_id.to_string()))
    }

    async fn load_participant(&self, match_id: &str, address: &str) -> Result<(MatchRecord, Side), ProtocolError> {
        let record = self.load_match(match_id).await?;
        let side = record.side_of(address).ok_or_else(|| {
            debug!("{} is not seated in match {}", address, match_id);
            ProtocolError::NotParticipant {
                match_id: match_id.to_string(),
                address: address.to_string(),
            }
        })?;
        Ok((record, side))
    }

    async fn load_combat(&self, match_id: &str) -> Result<CombatState, ProtocolError> {
        self.store
            .combat_state(match_id)
            .await?
            .ok_or_else(|| ProtocolError::Store(format!("no combat state for match {}", match_id)))
    }

    async fn verify_proof(
        &self,
        stage: &str,
        proof: &[u8],
        inputs: &PublicInputs,
        context: &VerificationContext,
    ) -> Result<OracleVerdict, ProtocolError> {
        let oracle = &self.oracle;
        let verdict = retry(self.config.oracle_retry, stage, move |_| oracle.verify(proof, inputs, context)).await?;
        if !verdict.accepted {
            warn!(
                match_id = %context.match_id,
                round = context.round,
                player = %context.player,
                backend = %verdict.backend,
                "{} proof rejected",
                stage
            );
            return Err(ProtocolError::ProofRejected {
                backend: verdict.backend,
            });
        }
        Ok(verdict)
    }

    /// Insert a forced stunned commit, counted as revealed. Returns false if
    /// the seat already had a row.
    async fn force_stunned(
        &self,
        record: &MatchRecord,
        round: u32,
        turn: u32,
        side: Side,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ProtocolError> {
        let plan = MovePlan::forced_stun();
        let row = RoundCommit {
            match_id: record.id.clone(),
            round,
            side,
            player: record.address(side).to_string(),
            turn,
            commitment: FieldElement::ZERO,
            sealed_plan: SealedPlan::seal(&PlanPayload::new(plan, None, turn))?,
            transcript_hash: FieldElement::ZERO,
            public_inputs: None,
            verified_at: None,
            verified_backend: None,
            forced: true,
            reveal: Some(RevealRecord {
                plan,
                surge: None,
                revealed_at: now,
            }),
            resolved_round_id: None,
            created_at: now,
        };
        if !self.store.insert_commit_if_absent(row).await? {
            return Ok(false);
        }

        info!("Auto-committed {} as stunned in match {} round {} ({})", side.label(), record.id, round, reason);
        self.events.emit(
            &record.id,
            EventKind::AutoCommitted,
            json!({ "round": round, "player": side, "reason": reason }),
        );
        Ok(true)
    }

    async fn commit_progress(&self, match_id: &str, round: u32) -> Result<RoundResponse, ProtocolError> {
        let rows = self.store.round_commits(match_id, round).await?;
        if rows.len() == Side::BOTH.len() && !rows.iter().any(RoundCommit::is_resolved) {
            self.events.emit(match_id, EventKind::BothCommitted, json!({ "round": round }));
            return Ok(RoundResponse::BothCommitted);
        }
        Ok(RoundResponse::AwaitingOpponent)
    }

    async fn reveal_progress(
        &self,
        match_id: &str,
        round: u32,
        expected_winner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RoundResponse, ProtocolError> {
        let rows = self.store.round_commits(match_id, round).await?;
        if let Some(resolved_round_id) = rows.iter().find_map(|r| r.resolved_round_id) {
            return Ok(RoundResponse::AlreadyResolved { resolved_round_id });
        }
        if revealed_plans(&rows).is_none() {
            return Ok(RoundResponse::AwaitingOpponent);
        }
        self.events.emit(match_id, EventKind::BothRevealed, json!({ "round": round }));
        self.try_resolve(match_id, round, expected_winner, now).await
    }

    async fn absent_commit_response(&self, match_id: &str, round: u32) -> Result<RoundResponse, ProtocolError> {
        if let Some(done) = self.store.resolved_round(match_id, round).await? {
            return Ok(RoundResponse::AlreadyResolved {
                resolved_round_id: done.id,
            });
        }
        Ok(RoundResponse::AwaitingOpponent)
    }

    /// Apply a resolved round to the match and combat state. Each write is
    /// guarded so a takeover can re-run this safely.
    async fn apply_resolution(&self, resolved: &ResolvedRound, now: DateTime<Utc>) -> Result<MatchRecord, ProtocolError> {
        let mut record = self.load_match(&resolved.match_id).await?;
        if record.last_resolved_round < resolved.round {
            if let Some(side) = resolved.winner {
                record.record_round_win(side);
            }
            record.last_resolved_round = resolved.round;
            if !record.is_completed() {
                record.move_deadline = Some(now + self.config.move_timeout());
            }
            self.store.put_match(record.clone()).await?;
        }

        let combat = self.load_combat(&resolved.match_id).await?;
        if combat.round == resolved.round {
            let mut next = resolved.final_state.clone();
            if !record.is_completed() {
                next.start_round(resolved.round + 1);
            }
            self.store.put_combat_state(next).await?;
        }
        Ok(record)
    }

    /// Mark the round resolved. Returns whether `owner` still held the lock.
    async fn release(&self, match_id: &str, round: u32, owner: Uuid, resolved_round_id: Uuid) -> Result<bool, ProtocolError> {
        self.store
            .mark_commits_resolved(match_id, round, resolved_round_id)
            .await?;
        let held = self
            .lock
            .mark_resolved(match_id, round, owner, resolved_round_id)
            .await?;
        if !held {
            warn!("Lost resolution lock for match {} round {} before release", match_id, round);
        }
        Ok(held)
    }

    fn announce(
        &self,
        match_id: &str,
        resolved: &ResolvedRound,
        record: &MatchRecord,
        turns: &[TurnRecord],
        digest_hex: &str,
    ) {
        for turn in turns {
            self.events.emit(
                match_id,
                EventKind::TurnResolved,
                serde_json::to_value(turn).unwrap_or_default(),
            );
        }
        self.events.emit(
            match_id,
            EventKind::RoundResolved,
            json!({
                "round": resolved.round,
                "resolvedRoundId": resolved.id,
                "ending": resolved.ending,
                "winner": resolved.winner,
                "roundsWon": record.rounds_won,
                "digest": digest_hex,
            }),
        );
        if record.is_completed() {
            info!("Match {} completed, winner {:?}", match_id, record.winner);
            self.events.emit(
                match_id,
                EventKind::MatchCompleted,
                json!({
                    "winner": record.winner,
                    "winnerAddress": record.winner.map(|side| record.address(side).to_string()),
                    "roundsWon": record.rounds_won,
                }),
            );
        }
    }
}

/// Plans and surge picks in seat order, if both seats have revealed.
fn revealed_plans(rows: &[RoundCommit]) -> Option<([MovePlan; 2], [Option<SurgeCard>; 2])> {
    let mut plans = [None, None];
    let mut surge = [None, None];
    for row in rows {
        let reveal = row.reveal.as_ref()?;
        plans[row.side.index()] = Some(reveal.plan);
        surge[row.side.index()] = reveal.surge;
    }
    Some(([plans[0]?, plans[1]?], surge))
}

fn decode_proof(raw: &str) -> Result<Vec<u8>, ProtocolError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| ProtocolError::InvalidInput(format!("proof is not valid hex: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatingMode;
    use crate::proof::oracle::{OracleError, StubOracle};
    use crate::round::error::ErrorClass;
    use crate::round::events::{EventBus, MatchEvent};
    use crate::core::backoff::RetryPolicy;
    use crate::round::anchor::{Anchor, AnchorError, AnchorReceipt, LogAnchor};
    use crate::round::store::{CommitStore, LockRow, LockStore, MatchStore, MemoryStore, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    const P1: &str = "GPLAYERONE";
    const P2: &str = "GPLAYERTWO";

    /// Accepts or rejects everything, counting calls.
    #[derive(Clone)]
    struct CountingOracle {
        accept: bool,
        calls: Arc<AtomicU32>,
    }

    impl CountingOracle {
        fn accepting() -> Self {
            Self {
                accept: true,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn rejecting() -> Self {
            Self {
                accept: false,
                ..Self::accepting()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProofOracle for CountingOracle {
        fn backend(&self) -> &'static str {
            "counting"
        }

        fn is_sound(&self) -> bool {
            true
        }

        async fn verify(
            &self,
            _proof: &[u8],
            _public_inputs: &PublicInputs,
            _context: &VerificationContext,
        ) -> Result<OracleVerdict, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OracleVerdict {
                accepted: self.accept,
                backend: "counting".into(),
            })
        }
    }

    /// Ledger stand-in that accepts every submission.
    struct LedgerAnchor;

    impl Anchor for LedgerAnchor {
        fn is_ledger(&self) -> bool {
            true
        }

        async fn submit_commitment(
            &self,
            _match_id: &str,
            _round: u32,
            _player: &str,
            _commitment: &FieldElement,
        ) -> Result<AnchorReceipt, AnchorError> {
            Ok(AnchorReceipt::default())
        }

        async fn submit_verification(
            &self,
            _match_id: &str,
            _round: u32,
            _player: &str,
            _backend: &str,
        ) -> Result<AnchorReceipt, AnchorError> {
            Ok(AnchorReceipt::default())
        }
    }

    fn ledger_queue() -> AnchorQueue {
        AnchorQueue::spawn(LedgerAnchor, 16, RetryPolicy::once()).0
    }

    struct Harness<S: RoundStore = MemoryStore> {
        service: Arc<RoundService<S, CountingOracle>>,
        oracle: CountingOracle,
        events: tokio::sync::broadcast::Receiver<MatchEvent>,
        now: DateTime<Utc>,
    }

    async fn harness_on<S: RoundStore>(
        store: S,
        config: ProtocolConfig,
        oracle: CountingOracle,
        format: MatchFormat,
    ) -> Harness<S> {
        let bus = EventBus::new(1024);
        let events = bus.subscribe();
        let anchor = if config.is_strict() {
            ledger_queue()
        } else {
            AnchorQueue::disabled()
        };
        let service = RoundService::new(Arc::new(store), oracle.clone(), Arc::new(bus), anchor, config).unwrap();
        let now = Utc::now();
        service.create_match("m1", P1, P2, format, now).await.unwrap();
        service.start_match("m1", now).await.unwrap();
        Harness {
            service: Arc::new(service),
            oracle,
            events,
            now,
        }
    }

    async fn harness_with(config: ProtocolConfig, oracle: CountingOracle, format: MatchFormat) -> Harness {
        harness_on(MemoryStore::new(), config, oracle, format).await
    }

    async fn harness() -> Harness {
        harness_with(ProtocolConfig::default(), CountingOracle::accepting(), MatchFormat::BestOf3).await
    }

    fn nonce_for(address: &str) -> FieldElement {
        FieldElement::from_u64(if address == P1 { 1111 } else { 2222 })
    }

    fn commit_request(address: &str, round: u32, plan: MovePlan, surge: Option<SurgeCard>) -> CommitRequest {
        let nonce = nonce_for(address);
        let commitment = CommitmentOpening {
            match_id: "m1".into(),
            round,
            turn: 1,
            player: address.into(),
            surge,
            nonce,
            plan,
        }
        .commit()
        .unwrap();
        CommitRequest {
            match_id: "m1".into(),
            address: address.into(),
            round,
            turn: 1,
            commitment,
            proof: "0xc0ffee".into(),
            public_inputs: PublicInputs::for_context(commitment, "m1", address, round, 1),
            transcript_hash: nonce,
            encrypted_plan: SealedPlan::seal(&PlanPayload::new(plan, surge, 1)).unwrap(),
        }
    }

    fn reveal_request(commit: &CommitRequest, plan: MovePlan, surge: Option<SurgeCard>) -> RevealRequest {
        RevealRequest {
            match_id: commit.match_id.clone(),
            address: commit.address.clone(),
            round: commit.round,
            turn: commit.turn,
            current_move: plan.head(),
            move_plan: plan.moves().to_vec(),
            surge_card_id: surge,
            proof: commit.proof.clone(),
            public_inputs: Some(commit.public_inputs.clone()),
            transcript_hash: commit.transcript_hash,
            expected_winner: None,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<MatchEvent>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event);
        }
        kinds
    }

    fn resolution(response: RoundResponse) -> Resolution {
        match response {
            RoundResponse::Resolution(r) => *r,
            other => panic!("expected a resolution, got {:?}", other),
        }
    }

    /// Commit and reveal both sides; the second reveal resolves.
    async fn play_round(h: &Harness, round: u32, p1: MovePlan, p2: MovePlan) -> Resolution {
        let c1 = commit_request(P1, round, p1, None);
        let c2 = commit_request(P2, round, p2, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();
        h.service.commit(c2.clone(), h.now).await.unwrap();
        h.service.reveal(reveal_request(&c1, p1, None), h.now).await.unwrap();
        resolution(h.service.reveal(reveal_request(&c2, p2, None), h.now).await.unwrap())
    }

    #[tokio::test]
    async fn test_full_round_specials_against_punches() {
        let mut h = harness().await;
        let specials = MovePlan::repeat(Move::Special);
        let punches = MovePlan::repeat(Move::Punch);
        let c1 = commit_request(P1, 1, specials, None);
        let c2 = commit_request(P2, 1, punches, None);

        assert_eq!(h.service.commit(c1.clone(), h.now).await.unwrap(), RoundResponse::AwaitingOpponent);
        assert_eq!(h.service.commit(c2.clone(), h.now).await.unwrap(), RoundResponse::BothCommitted);
        assert_eq!(
            h.service.reveal(reveal_request(&c1, specials, None), h.now).await.unwrap(),
            RoundResponse::AwaitingOpponent
        );

        let mut reveal = reveal_request(&c2, punches, None);
        reveal.expected_winner = Some(P1.into());
        let result = resolution(h.service.reveal(reveal, h.now).await.unwrap());

        assert_eq!(result.turns[0].outcome.damage_taken, [10, 0]);
        assert_eq!(result.ending, RoundEnding::Knockout);
        assert_eq!(result.winner, Some(Side::Player2));
        assert_eq!(result.winner_address.as_deref(), Some(P2));
        assert_eq!(result.rounds_won, [0, 1]);
        assert!(!result.match_over);
        assert_eq!(result.digest.len(), 64);
        assert_eq!(h.oracle.calls(), 2);

        let store = h.service.store();
        assert_eq!(store.turns("m1", 1).await.unwrap().len(), result.turns.len());
        for row in store.round_commits("m1", 1).await.unwrap() {
            assert_eq!(row.resolved_round_id, Some(result.resolved_round_id));
        }
        let combat = store.combat_state("m1").await.unwrap().unwrap();
        assert_eq!(combat.round, 2);
        assert_eq!(combat.turn, 1);
        assert_eq!(combat.fighters, [FighterState::fresh(); 2]);

        let status = h.service.round_status("m1", 1).await.unwrap();
        assert_eq!(status.phase, RoundPhase::Resolved);

        let events = drain(&mut h.events);
        for kind in [
            EventKind::MatchStarted,
            EventKind::PlayerCommitted,
            EventKind::BothCommitted,
            EventKind::PlayerRevealed,
            EventKind::BothRevealed,
            EventKind::TurnResolved,
            EventKind::RoundResolved,
        ] {
            assert!(events.contains(&kind), "missing {:?}", kind);
        }
        assert!(!events.contains(&EventKind::MatchCompleted));
    }

    #[tokio::test]
    async fn test_nine_move_plan_never_reaches_oracle() {
        let h = harness().await;
        let mut req = commit_request(P1, 1, MovePlan::repeat(Move::Kick), None);
        let short = r#"{"format":"plan-v1","move":"kick","movePlan":["kick","kick","kick","kick","kick","kick","kick","kick","kick"]}"#;
        req.encrypted_plan = SealedPlan::from_bytes(short.as_bytes().to_vec()).unwrap();

        let err = h.service.commit(req, h.now).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::BadRequest);
        assert_eq!(h.oracle.calls(), 0);
        assert!(h.service.store().round_commits("m1", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reveal_must_open_commitment_even_with_valid_proof() {
        let config = ProtocolConfig {
            reveal_verify: RevealVerification::Always,
            ..ProtocolConfig::default()
        };
        let h = harness_with(config, CountingOracle::accepting(), MatchFormat::BestOf3).await;
        let plan = MovePlan::repeat(Move::Kick);
        let c1 = commit_request(P1, 1, plan, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();

        let mut moves = *plan.moves();
        moves[4] = Move::Block;
        let tampered = MovePlan::new(moves);
        let err = h
            .service
            .reveal(reveal_request(&c1, tampered, None), h.now)
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::BindingMismatch);
        assert_eq!(err.status_code(), 409);

        // Surge selection is bound too.
        let err = h
            .service
            .reveal(reveal_request(&c1, plan, Some(SurgeCard::Fury)), h.now)
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::BindingMismatch);

        let row = h.service.store().commit("m1", 1, Side::Player1).await.unwrap().unwrap();
        assert!(!row.is_revealed());
    }

    #[tokio::test]
    async fn test_transcript_and_public_input_mismatch() {
        let h = harness().await;
        let plan = MovePlan::repeat(Move::Punch);
        let c1 = commit_request(P1, 1, plan, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();

        let mut reveal = reveal_request(&c1, plan, None);
        reveal.transcript_hash = FieldElement::from_u64(9);
        assert_eq!(
            h.service.reveal(reveal, h.now).await.unwrap_err(),
            ProtocolError::TranscriptMismatch
        );

        let mut reveal = reveal_request(&c1, plan, None);
        reveal.public_inputs = Some(PublicInputs::commitment_only(c1.commitment));
        assert_eq!(
            h.service.reveal(reveal, h.now).await.unwrap_err(),
            ProtocolError::PublicInputsMismatch
        );
    }

    #[tokio::test]
    async fn test_commit_rejections_do_not_write() {
        let h = harness().await;
        let plan = MovePlan::repeat(Move::Block);

        let mut req = commit_request(P1, 1, plan, None);
        req.public_inputs = PublicInputs::commitment_only(FieldElement::from_u64(77));
        let err = h.service.commit(req, h.now).await.unwrap_err();
        assert!(matches!(err, ProtocolError::CommitmentMismatch { .. }));

        let mut req = commit_request(P1, 1, plan, None);
        req.address = "GMALLORY".into();
        assert_eq!(h.service.commit(req, h.now).await.unwrap_err().status_code(), 403);

        let mut req = commit_request(P1, 1, plan, None);
        req.match_id = "nope".into();
        assert_eq!(h.service.commit(req, h.now).await.unwrap_err().status_code(), 404);

        let req = commit_request(P1, 2, plan, None);
        assert!(matches!(
            h.service.commit(req, h.now).await.unwrap_err(),
            ProtocolError::RoundMismatch { expected: 1, got: 2 }
        ));

        let mut req = commit_request(P1, 1, plan, None);
        req.proof = "not-hex".into();
        assert_eq!(h.service.commit(req, h.now).await.unwrap_err().status_code(), 400);

        assert!(h.service.store().round_commits("m1", 1).await.unwrap().is_empty());
        assert_eq!(h.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_proof_is_not_stored() {
        let h = harness_with(ProtocolConfig::default(), CountingOracle::rejecting(), MatchFormat::BestOf3).await;
        let req = commit_request(P1, 1, MovePlan::repeat(Move::Kick), None);
        let err = h.service.commit(req, h.now).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ProofRejected {
                backend: "counting".into()
            }
        );
        assert!(h.service.store().commit("m1", 1, Side::Player1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_before_start_is_conflict() {
        let service = RoundService::new(
            Arc::new(MemoryStore::new()),
            StubOracle,
            Arc::new(EventBus::default()),
            AnchorQueue::disabled(),
            ProtocolConfig::default(),
        )
        .unwrap();
        let now = Utc::now();
        service.create_match("m1", P1, P2, MatchFormat::BestOf3, now).await.unwrap();
        assert!(matches!(
            service.create_match("m1", P1, P2, MatchFormat::BestOf3, now).await,
            Err(ProtocolError::MatchExists(_))
        ));

        let req = commit_request(P1, 1, MovePlan::repeat(Move::Kick), None);
        assert_eq!(
            service.commit(req, now).await.unwrap_err(),
            ProtocolError::MatchNotInProgress("m1".into())
        );
    }

    #[tokio::test]
    async fn test_deferred_verification_runs_at_reveal() {
        let config = ProtocolConfig {
            defer_commit_verify: true,
            ..ProtocolConfig::default()
        };
        let h = harness_with(config, CountingOracle::accepting(), MatchFormat::BestOf3).await;
        let plan = MovePlan::repeat(Move::Kick);
        let c1 = commit_request(P1, 1, plan, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();
        assert_eq!(h.oracle.calls(), 0);
        let row = h.service.store().commit("m1", 1, Side::Player1).await.unwrap().unwrap();
        assert!(row.verified_at.is_none());

        h.service.reveal(reveal_request(&c1, plan, None), h.now).await.unwrap();
        assert_eq!(h.oracle.calls(), 1);
        let row = h.service.store().commit("m1", 1, Side::Player1).await.unwrap().unwrap();
        assert_eq!(row.verified_backend.as_deref(), Some("counting"));
    }

    #[tokio::test]
    async fn test_reveal_reuses_commit_verification() {
        let h = harness().await;
        let plan = MovePlan::repeat(Move::Kick);
        let c1 = commit_request(P1, 1, plan, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();
        h.service.reveal(reveal_request(&c1, plan, None), h.now).await.unwrap();
        assert_eq!(h.oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_strict_mode_refusals() {
        let strict = ProtocolConfig {
            mode: OperatingMode::Strict,
            ..ProtocolConfig::default()
        };
        let disabled = RoundService::new(
            Arc::new(MemoryStore::new()),
            crate::proof::oracle::DisabledOracle,
            Arc::new(EventBus::default()),
            ledger_queue(),
            strict.clone(),
        );
        assert!(matches!(disabled, Err(ProtocolError::StrictModeRefused(_))));

        // The stub accepts any non-empty bytes, so it does not count as verification.
        let stub = RoundService::new(
            Arc::new(MemoryStore::new()),
            StubOracle,
            Arc::new(EventBus::default()),
            ledger_queue(),
            strict.clone(),
        );
        assert!(matches!(stub, Err(ProtocolError::StrictModeRefused(_))));

        let no_anchor = RoundService::new(
            Arc::new(MemoryStore::new()),
            CountingOracle::accepting(),
            Arc::new(EventBus::default()),
            AnchorQueue::disabled(),
            strict.clone(),
        );
        assert!(matches!(no_anchor, Err(ProtocolError::StrictModeRefused(_))));

        let log_only = RoundService::new(
            Arc::new(MemoryStore::new()),
            CountingOracle::accepting(),
            Arc::new(EventBus::default()),
            AnchorQueue::spawn(LogAnchor, 4, RetryPolicy::once()).0,
            strict.clone(),
        );
        assert!(matches!(log_only, Err(ProtocolError::StrictModeRefused(_))));

        let sound = RoundService::new(
            Arc::new(MemoryStore::new()),
            CountingOracle::accepting(),
            Arc::new(EventBus::default()),
            ledger_queue(),
            strict,
        );
        assert!(sound.is_ok());
    }

    #[tokio::test]
    async fn test_strict_mode_reverifies_when_opponent_is_unverified() {
        for (mode, expected_calls) in [(OperatingMode::Standard, 2), (OperatingMode::Strict, 3)] {
            let config = ProtocolConfig {
                mode,
                ..ProtocolConfig::default()
            };
            let h = harness_with(config, CountingOracle::accepting(), MatchFormat::BestOf3).await;
            let kicks = MovePlan::repeat(Move::Kick);
            let blocks = MovePlan::repeat(Move::Block);
            let c1 = commit_request(P1, 1, kicks, None);
            let c2 = commit_request(P2, 1, blocks, None);
            h.service.commit(c1.clone(), h.now).await.unwrap();
            h.service.commit(c2.clone(), h.now).await.unwrap();
            assert_eq!(h.oracle.calls(), 2);

            // Player one's commit was accepted by a node that deferred verification.
            let store = h.service.store();
            let mut row = store.commit("m1", 1, Side::Player1).await.unwrap().unwrap();
            row.verified_at = None;
            row.verified_backend = None;
            store.upsert_commit(row).await.unwrap();

            h.service.reveal(reveal_request(&c2, blocks, None), h.now).await.unwrap();
            assert_eq!(h.oracle.calls(), expected_calls, "{:?}", mode);

            // The unverified side is always checked at reveal.
            h.service.reveal(reveal_request(&c1, kicks, None), h.now).await.unwrap();
            assert_eq!(h.oracle.calls(), expected_calls + 1, "{:?}", mode);
        }
    }

    #[tokio::test]
    async fn test_stunned_seat_cannot_commit_its_own_plan() {
        let mut h = harness().await;
        let store = h.service.store();
        let mut combat = store.combat_state("m1").await.unwrap().unwrap();
        combat.stunned = [false, true];
        store.put_combat_state(combat).await.unwrap();

        // The stunned seat commits first.
        let c2 = commit_request(P2, 1, MovePlan::repeat(Move::Special), None);
        assert_eq!(h.service.commit(c2, h.now).await.unwrap_err(), ProtocolError::ForcedCommit(1));
        assert_eq!(h.oracle.calls(), 0);

        let forced = store.commit("m1", 1, Side::Player2).await.unwrap().unwrap();
        assert!(forced.forced);
        assert_eq!(forced.reveal.unwrap().plan, MovePlan::forced_stun());
        assert!(drain(&mut h.events).contains(&EventKind::AutoCommitted));

        let kicks = MovePlan::repeat(Move::Kick);
        let c1 = commit_request(P1, 1, kicks, None);
        assert_eq!(h.service.commit(c1.clone(), h.now).await.unwrap(), RoundResponse::BothCommitted);

        let result = resolution(h.service.reveal(reveal_request(&c1, kicks, None), h.now).await.unwrap());
        assert_eq!(result.winner, Some(Side::Player1));
        assert_eq!(result.turns.len(), 7);
        assert!(result.turns.iter().all(|t| t.outcome.moves[1] == Move::Stunned));
    }

    #[tokio::test]
    async fn test_stunned_opponent_is_auto_committed() {
        let mut h = harness().await;
        let store = h.service.store();
        let mut combat = store.combat_state("m1").await.unwrap().unwrap();
        combat.stunned = [false, true];
        store.put_combat_state(combat).await.unwrap();

        let kicks = MovePlan::repeat(Move::Kick);
        let c1 = commit_request(P1, 1, kicks, None);
        assert_eq!(h.service.commit(c1.clone(), h.now).await.unwrap(), RoundResponse::BothCommitted);

        let forced = store.commit("m1", 1, Side::Player2).await.unwrap().unwrap();
        assert!(forced.forced);
        assert!(forced.commitment.is_zero());
        assert!(drain(&mut h.events).contains(&EventKind::AutoCommitted));

        let c2 = commit_request(P2, 1, MovePlan::repeat(Move::Punch), None);
        assert_eq!(h.service.commit(c2, h.now).await.unwrap_err(), ProtocolError::ForcedCommit(1));

        let result = resolution(h.service.reveal(reveal_request(&c1, kicks, None), h.now).await.unwrap());
        assert_eq!(result.winner, Some(Side::Player1));
        assert_eq!(result.ending, RoundEnding::Knockout);
        assert_eq!(result.turns.len(), 7);
        assert!(result.turns.iter().all(|t| t.outcome.moves[1] == Move::Stunned));
    }

    #[tokio::test]
    async fn test_timeout_forces_missing_side() {
        let h = harness().await;
        let kicks = MovePlan::repeat(Move::Kick);
        let c1 = commit_request(P1, 1, kicks, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();

        let early = h.service.expire_deadline("m1", h.now).await.unwrap();
        assert!(early.forced.is_empty());

        let late = h.now + chrono::Duration::seconds(61);
        let report = h.service.expire_deadline("m1", late).await.unwrap();
        assert_eq!(report.forced, vec![Side::Player2]);
        assert_eq!(report.response, Some(RoundResponse::AwaitingOpponent));
        assert_eq!(
            h.service.round_status("m1", 1).await.unwrap().phase,
            RoundPhase::AwaitingReveals
        );

        // A second sweep has nothing left to force.
        assert!(h.service.expire_deadline("m1", late).await.unwrap().forced.is_empty());

        let result = resolution(h.service.reveal(reveal_request(&c1, kicks, None), late).await.unwrap());
        assert_eq!(result.winner, Some(Side::Player1));
    }

    #[tokio::test]
    async fn test_timeout_with_no_commits_resolves_as_draw() {
        let h = harness().await;
        let late = h.now + chrono::Duration::seconds(61);
        let reports = h.service.sweep_deadlines(late).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].forced, vec![Side::Player1, Side::Player2]);

        let result = match reports[0].response.clone() {
            Some(RoundResponse::Resolution(r)) => *r,
            other => panic!("expected resolution, got {:?}", other),
        };
        assert_eq!(result.ending, RoundEnding::Draw);
        assert_eq!(result.rounds_won, [0, 0]);

        let record = h.service.store().get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.move_deadline, Some(late + chrono::Duration::seconds(60)));
    }

    /// Both sides revealed, then eight callers race to resolve.
    async fn race_resolvers(store: MemoryStore) {
        let mut h = harness_on(store, ProtocolConfig::default(), CountingOracle::accepting(), MatchFormat::BestOf3).await;
        let p1 = MovePlan::repeat(Move::Block);
        let p2 = MovePlan::repeat(Move::Punch);
        let c1 = commit_request(P1, 1, p1, None);
        let c2 = commit_request(P2, 1, p2, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();
        h.service.commit(c2.clone(), h.now).await.unwrap();
        h.service.reveal(reveal_request(&c1, p1, None), h.now).await.unwrap();

        // Record the second reveal without triggering resolution.
        let store = h.service.store();
        let mut row = store.commit("m1", 1, Side::Player2).await.unwrap().unwrap();
        row.reveal = Some(RevealRecord {
            plan: p2,
            surge: None,
            revealed_at: h.now,
        });
        store.upsert_commit(row).await.unwrap();
        drain(&mut h.events);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = h.service.clone();
            let now = h.now;
            handles.push(tokio::spawn(async move { service.try_resolve("m1", 1, None, now).await }));
        }

        let mut resolutions = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                RoundResponse::Resolution(_) => resolutions += 1,
                RoundResponse::AwaitingResolver | RoundResponse::AlreadyResolved { .. } => {}
                other => panic!("unexpected response {:?}", other),
            }
        }
        assert_eq!(resolutions, 1);

        let events = drain(&mut h.events);
        assert_eq!(events.iter().filter(|e| **e == EventKind::RoundResolved).count(), 1);
        assert_eq!(events.iter().filter(|e| **e == EventKind::TurnResolved).count(), 10);

        let record = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.rounds_won, [0, 1]);
        assert_eq!(record.last_resolved_round, 1);
        assert_eq!(store.turns("m1", 1).await.unwrap().len(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolvers_play_round_once() {
        race_resolvers(MemoryStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolvers_without_lock_table() {
        race_resolvers(MemoryStore::without_lock_table()).await;
    }

    #[tokio::test]
    async fn test_fresh_lock_blocks_then_stale_lock_is_taken_over() {
        let h = harness().await;
        let p1 = MovePlan::repeat(Move::Special);
        let p2 = MovePlan::repeat(Move::Punch);
        let c1 = commit_request(P1, 1, p1, None);
        let c2 = commit_request(P2, 1, p2, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();
        h.service.commit(c2.clone(), h.now).await.unwrap();
        h.service.reveal(reveal_request(&c1, p1, None), h.now).await.unwrap();

        // Another process grabbed the lock and stalled.
        let store = h.service.store();
        store
            .insert_lock_if_absent(LockRow {
                match_id: "m1".into(),
                round: 1,
                owner: Uuid::new_v4(),
                acquired_at: h.now,
                resolved_round_id: None,
            })
            .await
            .unwrap();

        assert_eq!(
            h.service.reveal(reveal_request(&c2, p2, None), h.now).await.unwrap(),
            RoundResponse::AwaitingResolver
        );
        assert_eq!(h.service.round_status("m1", 1).await.unwrap().phase, RoundPhase::Resolving);

        let later = h.now + chrono::Duration::seconds(31);
        let result = resolution(h.service.try_resolve("m1", 1, None, later).await.unwrap());
        assert_eq!(result.winner, Some(Side::Player2));

        // Re-sending the reveal after resolution is idempotent.
        assert_eq!(
            h.service.reveal(reveal_request(&c2, p2, None), later).await.unwrap(),
            RoundResponse::AlreadyResolved {
                resolved_round_id: result.resolved_round_id
            }
        );
    }

    /// Memory store where another resolver takes the lock over while the
    /// current holder is writing its result.
    struct StolenLockStore {
        inner: MemoryStore,
        thief: Uuid,
    }

    impl CommitStore for StolenLockStore {
        async fn commit(&self, match_id: &str, round: u32, side: Side) -> Result<Option<RoundCommit>, StoreError> {
            self.inner.commit(match_id, round, side).await
        }

        async fn upsert_commit(&self, commit: RoundCommit) -> Result<(), StoreError> {
            self.inner.upsert_commit(commit).await
        }

        async fn insert_commit_if_absent(&self, commit: RoundCommit) -> Result<bool, StoreError> {
            self.inner.insert_commit_if_absent(commit).await
        }

        async fn round_commits(&self, match_id: &str, round: u32) -> Result<Vec<RoundCommit>, StoreError> {
            self.inner.round_commits(match_id, round).await
        }

        async fn mark_commits_resolved(
            &self,
            match_id: &str,
            round: u32,
            resolved_round_id: Uuid,
        ) -> Result<usize, StoreError> {
            self.inner.mark_commits_resolved(match_id, round, resolved_round_id).await
        }
    }

    impl LockStore for StolenLockStore {
        async fn insert_lock_if_absent(&self, row: LockRow) -> Result<Option<LockRow>, StoreError> {
            self.inner.insert_lock_if_absent(row).await
        }

        async fn steal_lock(
            &self,
            match_id: &str,
            round: u32,
            expected_owner: Uuid,
            new_owner: Uuid,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.steal_lock(match_id, round, expected_owner, new_owner, now).await
        }

        async fn mark_lock_resolved(
            &self,
            match_id: &str,
            round: u32,
            owner: Uuid,
            resolved_round_id: Uuid,
        ) -> Result<bool, StoreError> {
            self.inner.mark_lock_resolved(match_id, round, owner, resolved_round_id).await
        }

        async fn lock_row(&self, match_id: &str, round: u32) -> Result<Option<LockRow>, StoreError> {
            self.inner.lock_row(match_id, round).await
        }
    }

    impl MatchStore for StolenLockStore {
        async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
            self.inner.get_match(match_id).await
        }

        async fn put_match(&self, record: MatchRecord) -> Result<(), StoreError> {
            self.inner.put_match(record).await
        }

        async fn matches_with_status(&self, status: MatchStatus) -> Result<Vec<MatchRecord>, StoreError> {
            self.inner.matches_with_status(status).await
        }

        async fn combat_state(&self, match_id: &str) -> Result<Option<CombatState>, StoreError> {
            self.inner.combat_state(match_id).await
        }

        async fn put_combat_state(&self, state: CombatState) -> Result<(), StoreError> {
            self.inner.put_combat_state(state).await
        }

        async fn append_turn(&self, record: TurnRecord) -> Result<(), StoreError> {
            self.inner.append_turn(record).await
        }

        async fn turns(&self, match_id: &str, round: u32) -> Result<Vec<TurnRecord>, StoreError> {
            self.inner.turns(match_id, round).await
        }

        async fn put_resolved_round(&self, row: ResolvedRound) -> Result<(), StoreError> {
            if let Some(lock) = self.inner.lock_row(&row.match_id, row.round).await? {
                self.inner
                    .steal_lock(&row.match_id, row.round, lock.owner, self.thief, row.resolved_at)
                    .await?;
            }
            self.inner.put_resolved_round(row).await
        }

        async fn resolved_round(&self, match_id: &str, round: u32) -> Result<Option<ResolvedRound>, StoreError> {
            self.inner.resolved_round(match_id, round).await
        }
    }

    #[tokio::test]
    async fn test_resolver_that_lost_its_lock_stays_quiet() {
        let store = StolenLockStore {
            inner: MemoryStore::new(),
            thief: Uuid::new_v4(),
        };
        let thief = store.thief;
        let mut h = harness_on(store, ProtocolConfig::default(), CountingOracle::accepting(), MatchFormat::BestOf3).await;
        let p1 = MovePlan::repeat(Move::Special);
        let p2 = MovePlan::repeat(Move::Punch);
        let c1 = commit_request(P1, 1, p1, None);
        let c2 = commit_request(P2, 1, p2, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();
        h.service.commit(c2.clone(), h.now).await.unwrap();
        h.service.reveal(reveal_request(&c1, p1, None), h.now).await.unwrap();
        drain(&mut h.events);

        let result = resolution(h.service.reveal(reveal_request(&c2, p2, None), h.now).await.unwrap());
        assert_eq!(result.winner, Some(Side::Player2));

        let events = drain(&mut h.events);
        assert!(events.contains(&EventKind::BothRevealed));
        assert!(!events.contains(&EventKind::TurnResolved));
        assert!(!events.contains(&EventKind::RoundResolved));

        // The result is still persisted; the thief's lock stays open for it to release.
        let store = h.service.store();
        assert_eq!(store.lock_row("m1", 1).await.unwrap().unwrap().owner, thief);
        let record = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.rounds_won, [0, 1]);
        assert_eq!(
            store.round_commits("m1", 1).await.unwrap()[0].resolved_round_id,
            Some(result.resolved_round_id)
        );
    }

    async fn phase(h: &Harness) -> RoundPhase {
        h.service.round_status("m1", 1).await.unwrap().phase
    }

    #[tokio::test]
    async fn test_round_status_progression() {
        let h = harness().await;
        assert_eq!(phase(&h).await, RoundPhase::AwaitingCommits);

        let plan = MovePlan::repeat(Move::Block);
        let c1 = commit_request(P1, 1, plan, None);
        let c2 = commit_request(P2, 1, plan, None);
        h.service.commit(c1.clone(), h.now).await.unwrap();
        assert_eq!(phase(&h).await, RoundPhase::AwaitingCommits);
        h.service.commit(c2.clone(), h.now).await.unwrap();
        assert_eq!(phase(&h).await, RoundPhase::BothCommitted);
        h.service.reveal(reveal_request(&c1, plan, None), h.now).await.unwrap();
        assert_eq!(phase(&h).await, RoundPhase::AwaitingReveals);
        h.service.reveal(reveal_request(&c2, plan, None), h.now).await.unwrap();
        assert_eq!(phase(&h).await, RoundPhase::Resolved);
    }

    #[tokio::test]
    async fn test_best_of_three_completes() {
        let mut h = harness().await;
        let specials = MovePlan::repeat(Move::Special);
        let punches = MovePlan::repeat(Move::Punch);

        let first = play_round(&h, 1, specials, punches).await;
        assert!(!first.match_over);
        let second = play_round(&h, 2, specials, punches).await;
        assert!(second.match_over);
        assert_eq!(second.match_winner, Some(Side::Player2));
        assert_eq!(second.rounds_won, [0, 2]);

        let record = h.service.store().get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.move_deadline, None);
        assert!(drain(&mut h.events).contains(&EventKind::MatchCompleted));

        let req = commit_request(P1, 3, specials, None);
        assert_eq!(
            h.service.commit(req, h.now).await.unwrap_err(),
            ProtocolError::MatchNotInProgress("m1".into())
        );
    }

    #[tokio::test]
    async fn test_recommit_allowed_until_reveal() {
        let h = harness().await;
        let first = commit_request(P1, 1, MovePlan::repeat(Move::Kick), None);
        let second = commit_request(P1, 1, MovePlan::repeat(Move::Block), Some(SurgeCard::Bulwark));
        h.service.commit(first, h.now).await.unwrap();
        h.service.commit(second.clone(), h.now).await.unwrap();

        let row = h.service.store().commit("m1", 1, Side::Player1).await.unwrap().unwrap();
        assert_eq!(row.commitment, second.commitment);

        h.service
            .reveal(
                reveal_request(&second, MovePlan::repeat(Move::Block), Some(SurgeCard::Bulwark)),
                h.now,
            )
            .await
            .unwrap();
        assert_eq!(
            h.service.commit(second, h.now).await.unwrap_err(),
            ProtocolError::AlreadyRevealed(1)
        );
    }
}
