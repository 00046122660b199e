//! Round Protocol
//!
//! Commit-reveal rounds on top of the combat engine.
//!
//! ## Module Structure
//!
//! - `store`: Commit, lock, match and resolution tables (trait + in-memory)
//! - `lock`: At-most-one resolver per round, with stale takeover
//! - `events`: Best-effort match event fan-out
//! - `anchor`: Fire-and-forget mirroring to an external ledger
//! - `error`: Rejections and their status classes
//! - `machine`: The commit/reveal/resolve state machine

pub mod store;
pub mod lock;
pub mod events;
pub mod anchor;
pub mod error;
pub mod machine;

pub use store::{
    CommitStore, LockRow, LockStore, MatchStore, MemoryStore, ResolvedRound, RevealRecord, RoundCommit,
    RoundStore, StoreError,
};
pub use lock::{LockOutcome, ResolutionLock};
pub use events::{EventBus, EventKind, EventSink, MatchEvent};
pub use anchor::{Anchor, AnchorError, AnchorJob, AnchorQueue, AnchorReceipt, LogAnchor};
pub use error::{ErrorClass, ProtocolError};
pub use machine::{
    CommitRequest, Resolution, RevealRequest, RoundPhase, RoundResponse, RoundService, RoundStatus, TimeoutReport,
};
