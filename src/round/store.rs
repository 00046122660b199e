//! Round Storage
//!
//! Keyed record tables the protocol runs against: commit rows, the
//! resolution lock table, matches, combat state, turn records and resolved
//! rounds. The traits describe get/insert/update/upsert with a conflict key
//! and simple equality/null filters; `MemoryStore` is the in-process
//! implementation.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::field::FieldElement;
use crate::core::hash::Digest32;
use crate::game::moves::MovePlan;
use crate::game::playback::{RoundEnding, TurnRecord};
use crate::game::state::{CombatState, MatchRecord, MatchStatus, Side};
use crate::game::surge::SurgeCard;
use crate::proof::plan::SealedPlan;
use crate::proof::public_inputs::PublicInputs;

// =============================================================================
// ROWS
// =============================================================================

/// Revealed plan stored against a commit row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRecord {
    /// Revealed ten-move plan.
    pub plan: MovePlan,
    /// Revealed surge selection.
    pub surge: Option<SurgeCard>,
    /// When the reveal was accepted.
    pub revealed_at: DateTime<Utc>,
}

/// One commit per (match, round, player).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundCommit {
    /// Match identifier.
    pub match_id: String,
    /// Round number.
    pub round: u32,
    /// Seat.
    pub side: Side,
    /// Committing address.
    pub player: String,
    /// Turn at commit time.
    pub turn: u32,
    /// Poseidon commitment.
    pub commitment: FieldElement,
    /// Sealed plan blob as uploaded.
    pub sealed_plan: SealedPlan,
    /// Secret nonce; also the binding nonce for the commitment.
    pub transcript_hash: FieldElement,
    /// Public inputs the commit proof was checked against.
    pub public_inputs: Option<PublicInputs>,
    /// When a proof was accepted for this commit.
    pub verified_at: Option<DateTime<Utc>>,
    /// Backend that accepted it.
    pub verified_backend: Option<String>,
    /// Synthesized by the server for a side that could not act.
    pub forced: bool,
    /// Present once revealed.
    pub reveal: Option<RevealRecord>,
    /// Set once, when the round resolves. Row is immutable afterwards.
    pub resolved_round_id: Option<Uuid>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

impl RoundCommit {
    /// Has this side revealed?
    pub fn is_revealed(&self) -> bool {
        self.reveal.is_some()
    }

    /// Has the round this row belongs to been resolved?
    pub fn is_resolved(&self) -> bool {
        self.resolved_round_id.is_some()
    }
}

/// Resolution lock row keyed by (match, round).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRow {
    /// Match identifier.
    pub match_id: String,
    /// Round number.
    pub round: u32,
    /// Current holder.
    pub owner: Uuid,
    /// When the holder acquired it.
    pub acquired_at: DateTime<Utc>,
    /// Written exactly once on success.
    pub resolved_round_id: Option<Uuid>,
}

/// Outcome row written once per resolved round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRound {
    /// Resolved round id (shared with commit rows and the lock).
    pub id: Uuid,
    /// Match identifier.
    pub match_id: String,
    /// Round number.
    pub round: u32,
    /// How the round ended.
    pub ending: RoundEnding,
    /// Round winner.
    pub winner: Option<Side>,
    /// Turns played.
    pub turns_played: u32,
    /// SHA-256 over the round's turn records.
    #[serde(with = "hex_digest")]
    pub digest: Digest32,
    /// Combat state after the last turn, before any round reset.
    pub final_state: CombatState,
    /// Resolution time.
    pub resolved_at: DateTime<Utc>,
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(raw).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Write to a row that already carries a resolved round id.
    #[error("commit for match {match_id} round {round} is resolved and immutable")]
    Immutable {
        /// Match identifier.
        match_id: String,
        /// Round number.
        round: u32,
    },
    /// The lock table does not exist in this store.
    #[error("resolution lock table unavailable")]
    SchemaUnavailable,
    /// Backend failure.
    #[error("store backend: {0}")]
    Backend(String),
}

// =============================================================================
// TABLE TRAITS
// =============================================================================

/// Commit rows.
pub trait CommitStore: Send + Sync + 'static {
    /// Row for one seat.
    fn commit(
        &self,
        match_id: &str,
        round: u32,
        side: Side,
    ) -> impl Future<Output = Result<Option<RoundCommit>, StoreError>> + Send;

    /// Insert or replace, conflict key (match, round, side). Fails with
    /// `Immutable` if the existing row is resolved.
    fn upsert_commit(&self, commit: RoundCommit) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert only if no row exists for the seat. Returns whether it inserted.
    fn insert_commit_if_absent(&self, commit: RoundCommit) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// All rows for a round, seat order.
    fn round_commits(
        &self,
        match_id: &str,
        round: u32,
    ) -> impl Future<Output = Result<Vec<RoundCommit>, StoreError>> + Send;

    /// Set `resolved_round_id` on every row of the round where it is null.
    /// Returns the number of rows updated.
    fn mark_commits_resolved(
        &self,
        match_id: &str,
        round: u32,
        resolved_round_id: Uuid,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

/// Resolution lock table.
pub trait LockStore: Send + Sync + 'static {
    /// Insert if no row exists for (match, round). Returns the existing row
    /// on conflict, `None` when inserted.
    fn insert_lock_if_absent(&self, row: LockRow) -> impl Future<Output = Result<Option<LockRow>, StoreError>> + Send;

    /// Compare-and-swap the owner, only while unresolved.
    fn steal_lock(
        &self,
        match_id: &str,
        round: u32,
        expected_owner: Uuid,
        new_owner: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Write the resolved id if `owner` still holds the lock and it is unresolved.
    fn mark_lock_resolved(
        &self,
        match_id: &str,
        round: u32,
        owner: Uuid,
        resolved_round_id: Uuid,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Current row.
    fn lock_row(&self, match_id: &str, round: u32) -> impl Future<Output = Result<Option<LockRow>, StoreError>> + Send;
}

/// Matches, combat state, turn records and resolved rounds.
pub trait MatchStore: Send + Sync + 'static {
    /// Match by id.
    fn get_match(&self, match_id: &str) -> impl Future<Output = Result<Option<MatchRecord>, StoreError>> + Send;

    /// Insert or replace a match.
    fn put_match(&self, record: MatchRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Matches with a given status.
    fn matches_with_status(
        &self,
        status: MatchStatus,
    ) -> impl Future<Output = Result<Vec<MatchRecord>, StoreError>> + Send;

    /// Combat state for a match.
    fn combat_state(&self, match_id: &str) -> impl Future<Output = Result<Option<CombatState>, StoreError>> + Send;

    /// Insert or replace combat state.
    fn put_combat_state(&self, state: CombatState) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Persist one turn. Idempotent on (match, round, turn).
    fn append_turn(&self, record: TurnRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Turns of a round in order.
    fn turns(&self, match_id: &str, round: u32) -> impl Future<Output = Result<Vec<TurnRecord>, StoreError>> + Send;

    /// Write the resolved-round row. First write wins.
    fn put_resolved_round(&self, row: ResolvedRound) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Resolved-round row for (match, round).
    fn resolved_round(
        &self,
        match_id: &str,
        round: u32,
    ) -> impl Future<Output = Result<Option<ResolvedRound>, StoreError>> + Send;
}

/// Everything the round service needs.
pub trait RoundStore: CommitStore + LockStore + MatchStore {}

impl<T: CommitStore + LockStore + MatchStore> RoundStore for T {}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

type CommitKey = (String, u32, Side);
type RoundKey = (String, u32);
type TurnKey = (String, u32, u32);

/// In-process store. BTreeMap tables behind tokio `RwLock`s.
pub struct MemoryStore {
    commits: RwLock<BTreeMap<CommitKey, RoundCommit>>,
    locks: Option<RwLock<BTreeMap<RoundKey, LockRow>>>,
    matches: RwLock<BTreeMap<String, MatchRecord>>,
    combat: RwLock<BTreeMap<String, CombatState>>,
    turns: RwLock<BTreeMap<TurnKey, TurnRecord>>,
    resolved: RwLock<BTreeMap<RoundKey, ResolvedRound>>,
}

impl MemoryStore {
    /// Store with every table present.
    pub fn new() -> Self {
        Self {
            commits: RwLock::new(BTreeMap::new()),
            locks: Some(RwLock::new(BTreeMap::new())),
            matches: RwLock::new(BTreeMap::new()),
            combat: RwLock::new(BTreeMap::new()),
            turns: RwLock::new(BTreeMap::new()),
            resolved: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store whose lock table is missing, as on a database that has not
    /// been migrated yet.
    pub fn without_lock_table() -> Self {
        Self {
            locks: None,
            ..Self::new()
        }
    }

    fn locks(&self) -> Result<&RwLock<BTreeMap<RoundKey, LockRow>>, StoreError> {
        self.locks.as_ref().ok_or(StoreError::SchemaUnavailable)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitStore for MemoryStore {
    async fn commit(&self, match_id: &str, round: u32, side: Side) -> Result<Option<RoundCommit>, StoreError> {
        let commits = self.commits.read().await;
        Ok(commits.get(&(match_id.to_string(), round, side)).cloned())
    }

    async fn upsert_commit(&self, commit: RoundCommit) -> Result<(), StoreError> {
        let mut commits = self.commits.write().await;
        let key = (commit.match_id.clone(), commit.round, commit.side);
        if commits.get(&key).is_some_and(RoundCommit::is_resolved) {
            return Err(StoreError::Immutable {
                match_id: commit.match_id,
                round: commit.round,
            });
        }
        commits.insert(key, commit);
        Ok(())
    }

    async fn insert_commit_if_absent(&self, commit: RoundCommit) -> Result<bool, StoreError> {
        let mut commits = self.commits.write().await;
        let key = (commit.match_id.clone(), commit.round, commit.side);
        if commits.contains_key(&key) {
            return Ok(false);
        }
        commits.insert(key, commit);
        Ok(true)
    }

    async fn round_commits(&self, match_id: &str, round: u32) -> Result<Vec<RoundCommit>, StoreError> {
        let commits = self.commits.read().await;
        Ok(Side::BOTH
            .iter()
            .filter_map(|side| commits.get(&(match_id.to_string(), round, *side)).cloned())
            .collect())
    }

    async fn mark_commits_resolved(
        &self,
        match_id: &str,
        round: u32,
        resolved_round_id: Uuid,
    ) -> Result<usize, StoreError> {
        let mut commits = self.commits.write().await;
        let mut updated = 0;
        for side in Side::BOTH {
            if let Some(row) = commits.get_mut(&(match_id.to_string(), round, side)) {
                if row.resolved_round_id.is_none() {
                    row.resolved_round_id = Some(resolved_round_id);
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }
}

impl LockStore for MemoryStore {
    async fn insert_lock_if_absent(&self, row: LockRow) -> Result<Option<LockRow>, StoreError> {
        let mut locks = self.locks()?.write().await;
        let key = (row.match_id.clone(), row.round);
        if let Some(existing) = locks.get(&key) {
            return Ok(Some(existing.clone()));
        }
        locks.insert(key, row);
        Ok(None)
    }

    async fn steal_lock(
        &self,
        match_id: &str,
        round: u32,
        expected_owner: Uuid,
        new_owner: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut locks = self.locks()?.write().await;
        match locks.get_mut(&(match_id.to_string(), round)) {
            Some(row) if row.owner == expected_owner && row.resolved_round_id.is_none() => {
                row.owner = new_owner;
                row.acquired_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_lock_resolved(
        &self,
        match_id: &str,
        round: u32,
        owner: Uuid,
        resolved_round_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut locks = self.locks()?.write().await;
        match locks.get_mut(&(match_id.to_string(), round)) {
            Some(row) if row.owner == owner && row.resolved_round_id.is_none() => {
                row.resolved_round_id = Some(resolved_round_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_row(&self, match_id: &str, round: u32) -> Result<Option<LockRow>, StoreError> {
        let locks = self.locks()?.read().await;
        Ok(locks.get(&(match_id.to_string(), round)).cloned())
    }
}

impl MatchStore for MemoryStore {
    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.matches.read().await.get(match_id).cloned())
    }

    async fn put_match(&self, record: MatchRecord) -> Result<(), StoreError> {
        self.matches.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn matches_with_status(&self, status: MatchStatus) -> Result<Vec<MatchRecord>, StoreError> {
        let matches = self.matches.read().await;
        Ok(matches.values().filter(|m| m.status == status).cloned().collect())
    }

    async fn combat_state(&self, match_id: &str) -> Result<Option<CombatState>, StoreError> {
        Ok(self.combat.read().await.get(match_id).cloned())
    }

    async fn put_combat_state(&self, state: CombatState) -> Result<(), StoreError> {
        self.combat.write().await.insert(state.match_id.clone(), state);
        Ok(())
    }

    async fn append_turn(&self, record: TurnRecord) -> Result<(), StoreError> {
        let mut turns = self.turns.write().await;
        turns
            .entry((record.match_id.clone(), record.round, record.turn))
            .or_insert(record);
        Ok(())
    }

    async fn turns(&self, match_id: &str, round: u32) -> Result<Vec<TurnRecord>, StoreError> {
        let turns = self.turns.read().await;
        let start = (match_id.to_string(), round, 0);
        let end = (match_id.to_string(), round, u32::MAX);
        Ok(turns.range(start..=end).map(|(_, t)| t.clone()).collect())
    }

    async fn put_resolved_round(&self, row: ResolvedRound) -> Result<(), StoreError> {
        let mut resolved = self.resolved.write().await;
        resolved.entry((row.match_id.clone(), row.round)).or_insert(row);
        Ok(())
    }

    async fn resolved_round(&self, match_id: &str, round: u32) -> Result<Option<ResolvedRound>, StoreError> {
        Ok(self.resolved.read().await.get(&(match_id.to_string(), round)).cloned())
    }
}
