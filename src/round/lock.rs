//! Resolution Lock
//!
//! Exactly one resolver plays out a given (match, round). The lock is an
//! insert-if-absent row in the store; a collision means someone else holds or
//! held it. A holder that stalls past the staleness threshold loses the lock
//! to the next caller by compare-and-swap on the owner.
//!
//! When the store has no lock table, a process-local set stands in. That
//! only excludes resolvers within this process.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use super::store::{LockRow, LockStore, StoreError};

/// Result of trying to become the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Caller holds the lock and must run playback.
    Acquired,
    /// Someone else holds a fresh lock.
    InProgress,
    /// The round was resolved already.
    AlreadyResolved {
        /// Id written by the resolver.
        resolved_round_id: Uuid,
    },
}

/// Durable lock with a local fallback.
pub struct ResolutionLock<S> {
    store: Arc<S>,
    stale_after: Duration,
    local: LocalLockSet,
}

impl<S: LockStore> ResolutionLock<S> {
    /// Lock over `store`; holders older than `stale_after` may be replaced.
    pub fn new(store: Arc<S>, stale_after: Duration) -> Self {
        Self {
            store,
            stale_after,
            local: LocalLockSet::default(),
        }
    }

    /// Staleness threshold.
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Try to become the resolver for (match, round).
    pub async fn acquire(
        &self,
        match_id: &str,
        round: u32,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, StoreError> {
        let row = LockRow {
            match_id: match_id.to_string(),
            round,
            owner,
            acquired_at: now,
            resolved_round_id: None,
        };

        let existing = match self.store.insert_lock_if_absent(row).await {
            Ok(None) => return Ok(LockOutcome::Acquired),
            Ok(Some(existing)) => existing,
            Err(StoreError::SchemaUnavailable) => {
                warn!(match_id, round, "lock table unavailable, using process-local lock");
                return Ok(self.local.acquire(match_id, round, owner, now, self.stale_after));
            }
            Err(e) => return Err(e),
        };

        if let Some(resolved_round_id) = existing.resolved_round_id {
            return Ok(LockOutcome::AlreadyResolved { resolved_round_id });
        }
        if existing.owner == owner {
            return Ok(LockOutcome::Acquired);
        }
        if now - existing.acquired_at < self.stale_after {
            return Ok(LockOutcome::InProgress);
        }

        if self
            .store
            .steal_lock(match_id, round, existing.owner, owner, now)
            .await?
        {
            warn!(
                match_id,
                round,
                previous_owner = %existing.owner,
                held_for = %(now - existing.acquired_at),
                "took over stale resolution lock"
            );
            return Ok(LockOutcome::Acquired);
        }

        // Lost the CAS: either another caller stole it or it resolved meanwhile.
        match self.store.lock_row(match_id, round).await? {
            Some(LockRow {
                resolved_round_id: Some(resolved_round_id),
                ..
            }) => Ok(LockOutcome::AlreadyResolved { resolved_round_id }),
            _ => Ok(LockOutcome::InProgress),
        }
    }

    /// Record the resolved id. Only the current holder can write it, once.
    pub async fn mark_resolved(
        &self,
        match_id: &str,
        round: u32,
        owner: Uuid,
        resolved_round_id: Uuid,
    ) -> Result<bool, StoreError> {
        match self
            .store
            .mark_lock_resolved(match_id, round, owner, resolved_round_id)
            .await
        {
            Err(StoreError::SchemaUnavailable) => {
                Ok(self.local.mark_resolved(match_id, round, owner, resolved_round_id))
            }
            other => other,
        }
    }

    /// Current holder of an unresolved lock, if any.
    pub async fn holder(&self, match_id: &str, round: u32) -> Result<Option<Uuid>, StoreError> {
        let row = match self.store.lock_row(match_id, round).await {
            Err(StoreError::SchemaUnavailable) => return Ok(self.local.holder(match_id, round)),
            other => other?,
        };
        Ok(row.filter(|r| r.resolved_round_id.is_none()).map(|r| r.owner))
    }
}

// =============================================================================
// PROCESS-LOCAL FALLBACK
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct LocalEntry {
    owner: Uuid,
    acquired_at: DateTime<Utc>,
    resolved_round_id: Option<Uuid>,
}

/// Per-key lock entries scoped to one `ResolutionLock`.
#[derive(Debug, Default)]
struct LocalLockSet {
    entries: Mutex<BTreeMap<(String, u32), LocalEntry>>,
}

impl LocalLockSet {
    fn with_entries<R>(&self, f: impl FnOnce(&mut BTreeMap<(String, u32), LocalEntry>) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut entries)
    }

    fn acquire(
        &self,
        match_id: &str,
        round: u32,
        owner: Uuid,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> LockOutcome {
        self.with_entries(|entries| {
            let key = (match_id.to_string(), round);
            let Some(entry) = entries.get_mut(&key) else {
                entries.insert(
                    key,
                    LocalEntry {
                        owner,
                        acquired_at: now,
                        resolved_round_id: None,
                    },
                );
                return LockOutcome::Acquired;
            };

            if let Some(resolved_round_id) = entry.resolved_round_id {
                LockOutcome::AlreadyResolved { resolved_round_id }
            } else if entry.owner == owner {
                LockOutcome::Acquired
            } else if now - entry.acquired_at >= stale_after {
                warn!(match_id, round, previous_owner = %entry.owner, "took over stale local lock");
                entry.owner = owner;
                entry.acquired_at = now;
                LockOutcome::Acquired
            } else {
                LockOutcome::InProgress
            }
        })
    }

    fn mark_resolved(&self, match_id: &str, round: u32, owner: Uuid, resolved_round_id: Uuid) -> bool {
        self.with_entries(|entries| match entries.get_mut(&(match_id.to_string(), round)) {
            Some(entry) if entry.owner == owner && entry.resolved_round_id.is_none() => {
                entry.resolved_round_id = Some(resolved_round_id);
                true
            }
            _ => false,
        })
    }

    fn holder(&self, match_id: &str, round: u32) -> Option<Uuid> {
        self.with_entries(|entries| {
            entries
                .get(&(match_id.to_string(), round))
                .filter(|e| e.resolved_round_id.is_none())
                .map(|e| e.owner)
        })
    }
}
