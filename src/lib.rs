//! # Veilstar Brawl Server
//!
//! Commit-reveal round protocol and deterministic combat replay for a
//! two-player, best-of-N fighting game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  VEILSTAR BRAWL SERVER                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── field.rs    - BN254 scalar field elements              │
//! │  ├── hash.rs     - Domain-separated SHA-256 digests         │
//! │  └── backoff.rs  - Bounded retry with jitter                │
//! │                                                             │
//! │  game/           - Combat rules (deterministic)             │
//! │  ├── moves.rs    - Moves and ten-move plans                 │
//! │  ├── surge.rs    - Surge cards                              │
//! │  ├── combat.rs   - Single-turn resolution                   │
//! │  ├── state.rs    - Match record and carry-over state        │
//! │  └── playback.rs - Ten-turn round loop                      │
//! │                                                             │
//! │  proof/          - Commitments and proof verification       │
//! │  round/          - Commit-reveal state machine, lock, store │
//! │                                                             │
//! │  network/        - Networking (non-deterministic)           │
//! │  ├── server.rs   - WebSocket gateway                        │
//! │  ├── protocol.rs - Message types                            │
//! │  └── auth.rs     - JWT validation                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No floating-point arithmetic in combat
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - No randomness
//!
//! Given the same revealed plans and carry-over state, round playback
//! produces **identical turns and digest** on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod proof;
pub mod round;

// Re-export commonly used types
pub use config::{ConfigError, OperatingMode, ProtocolConfig, RevealVerification};
pub use core::field::FieldElement;
pub use game::moves::{Move, MovePlan};
pub use game::state::{CombatState, MatchFormat, MatchRecord, Side};
pub use round::machine::{CommitRequest, RevealRequest, RoundResponse, RoundService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
