//! Anchoring Queue
//!
//! Commitments and verification results can be mirrored to an external
//! ledger. Submissions are one-way: the round service pushes a job into a
//! bounded queue and moves on. A worker task drains the queue with bounded
//! retries. Failures are logged and dropped.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::backoff::{retry, RetryPolicy, Transient};
use crate::core::field::FieldElement;

/// Default queue depth.
pub const DEFAULT_ANCHOR_QUEUE: usize = 128;

/// Receipt from the anchoring collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReceipt {
    /// Ledger reference, when the collaborator returns one.
    pub tx_ref: Option<String>,
}

/// Anchoring failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    /// Collaborator refused the submission.
    #[error("anchor rejected submission: {0}")]
    Rejected(String),
    /// Collaborator could not be reached.
    #[error("anchor unavailable: {0}")]
    Unavailable(String),
}

impl Transient for AnchorError {
    fn is_transient(&self) -> bool {
        matches!(self, AnchorError::Unavailable(_))
    }
}

/// External anchoring collaborator.
pub trait Anchor: Send + Sync + 'static {
    /// Do submissions land on an external ledger? Strict mode requires it.
    fn is_ledger(&self) -> bool {
        false
    }

    /// Mirror a commitment.
    fn submit_commitment(
        &self,
        match_id: &str,
        round: u32,
        player: &str,
        commitment: &FieldElement,
    ) -> impl Future<Output = Result<AnchorReceipt, AnchorError>> + Send;

    /// Mirror an accepted verification.
    fn submit_verification(
        &self,
        match_id: &str,
        round: u32,
        player: &str,
        backend: &str,
    ) -> impl Future<Output = Result<AnchorReceipt, AnchorError>> + Send;
}

/// Anchor that only logs. Not a ledger, so strict mode refuses it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAnchor;

impl Anchor for LogAnchor {
    async fn submit_commitment(
        &self,
        match_id: &str,
        round: u32,
        player: &str,
        commitment: &FieldElement,
    ) -> Result<AnchorReceipt, AnchorError> {
        info!("anchor commitment {} for {} in match {} round {}", commitment, player, match_id, round);
        Ok(AnchorReceipt::default())
    }

    async fn submit_verification(
        &self,
        match_id: &str,
        round: u32,
        player: &str,
        backend: &str,
    ) -> Result<AnchorReceipt, AnchorError> {
        info!("anchor {} verification for {} in match {} round {}", backend, player, match_id, round);
        Ok(AnchorReceipt::default())
    }
}

/// Queued submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorJob {
    /// Commitment accepted.
    Commitment {
        /// Match identifier.
        match_id: String,
        /// Round.
        round: u32,
        /// Player address.
        player: String,
        /// Stored commitment.
        commitment: FieldElement,
    },
    /// Proof accepted.
    Verification {
        /// Match identifier.
        match_id: String,
        /// Round.
        round: u32,
        /// Player address.
        player: String,
        /// Backend that verified.
        backend: String,
    },
}

impl AnchorJob {
    fn label(&self) -> &'static str {
        match self {
            AnchorJob::Commitment { .. } => "anchor-commitment",
            AnchorJob::Verification { .. } => "anchor-verification",
        }
    }
}

async fn dispatch<A: Anchor>(anchor: &A, job: &AnchorJob) -> Result<AnchorReceipt, AnchorError> {
    match job {
        AnchorJob::Commitment {
            match_id,
            round,
            player,
            commitment,
        } => anchor.submit_commitment(match_id, *round, player, commitment).await,
        AnchorJob::Verification {
            match_id,
            round,
            player,
            backend,
        } => anchor.submit_verification(match_id, *round, player, backend).await,
    }
}

/// Sending half of the anchoring queue.
#[derive(Debug, Clone, Default)]
pub struct AnchorQueue {
    tx: Option<mpsc::Sender<AnchorJob>>,
    ledger: bool,
}

impl AnchorQueue {
    /// No collaborator configured; jobs are discarded.
    pub fn disabled() -> Self {
        Self { tx: None, ledger: false }
    }

    /// Spawn a worker draining into `anchor`.
    pub fn spawn<A: Anchor>(anchor: A, capacity: usize, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let ledger = anchor.is_ledger();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(anchor, rx, policy));
        (Self { tx: Some(tx), ledger }, handle)
    }

    /// Is a collaborator attached?
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Is the attached collaborator an external ledger?
    pub fn is_ledger_backed(&self) -> bool {
        self.tx.is_some() && self.ledger
    }

    /// Queue a job without waiting.
    pub fn enqueue(&self, job: AnchorJob) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Anchor queue full, dropping {}", job.label());
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!("Anchor worker stopped, dropping {}", job.label());
            }
        }
    }
}

async fn run_worker<A: Anchor>(anchor: A, mut rx: mpsc::Receiver<AnchorJob>, policy: RetryPolicy) {
    while let Some(job) = rx.recv().await {
        let (anchor_ref, job_ref) = (&anchor, &job);
        match retry(policy, job.label(), move |_| dispatch(anchor_ref, job_ref)).await {
            Ok(receipt) => debug!(job = job.label(), tx_ref = ?receipt.tx_ref, "anchored"),
            Err(e) => warn!(job = job.label(), error = %e, "anchoring failed"),
        }
    }
    debug!("Anchor worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails a fixed number of times, then succeeds.
    struct FlakyAnchor {
        failures_left: AtomicU32,
        calls: Arc<AtomicU32>,
    }

    impl Anchor for FlakyAnchor {
        async fn submit_commitment(
            &self,
            _match_id: &str,
            _round: u32,
            _player: &str,
            _commitment: &FieldElement,
        ) -> Result<AnchorReceipt, AnchorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(AnchorError::Unavailable("busy".into()));
            }
            Ok(AnchorReceipt {
                tx_ref: Some("tx-1".into()),
            })
        }

        async fn submit_verification(
            &self,
            _match_id: &str,
            _round: u32,
            _player: &str,
            _backend: &str,
        ) -> Result<AnchorReceipt, AnchorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AnchorError::Rejected("no".into()))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn commitment_job() -> AnchorJob {
        AnchorJob::Commitment {
            match_id: "m1".into(),
            round: 1,
            player: "alice".into(),
            commitment: FieldElement::from_u64(1),
        }
    }

    #[tokio::test]
    async fn test_worker_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let anchor = FlakyAnchor {
            failures_left: AtomicU32::new(2),
            calls: calls.clone(),
        };
        let (queue, handle) = AnchorQueue::spawn(anchor, 4, fast_policy());
        queue.enqueue(commitment_job());
        queue.enqueue(AnchorJob::Verification {
            match_id: "m1".into(),
            round: 1,
            player: "alice".into(),
            backend: "stub".into(),
        });
        drop(queue);
        handle.await.unwrap();

        // Two failures plus one success, then one permanent rejection.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_disabled_queue_discards() {
        let queue = AnchorQueue::disabled();
        assert!(!queue.is_enabled());
        assert!(!queue.is_ledger_backed());
        queue.enqueue(commitment_job());
    }

    #[tokio::test]
    async fn test_log_anchor_is_not_a_ledger() {
        let (queue, handle) = AnchorQueue::spawn(LogAnchor, 4, fast_policy());
        assert!(queue.is_enabled());
        assert!(!queue.is_ledger_backed());
        drop(queue);
        handle.await.unwrap();
    }
}
