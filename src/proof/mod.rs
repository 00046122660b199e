//! Commit-Reveal Proof Layer
//!
//! Binds hidden round plans to field-element commitments and checks proofs
//! of well-formedness without seeing the plan.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF LAYER                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  commitment.rs    - Poseidon commitment over plan + nonce   │
//! │  public_inputs.rs - Field inputs bound to a proof           │
//! │  plan.rs          - Sealed plan payload, decoded once       │
//! │  oracle.rs        - Verifier boundary (stub, Groth16)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod public_inputs;
pub mod plan;
pub mod oracle;

// Re-export key types
pub use commitment::{compute_commitment, CommitmentError, CommitmentOpening};
pub use public_inputs::{PublicInputs, PublicInputsError, CIRCUIT_INPUT_COUNT};
pub use plan::{PlanError, PlanFormat, PlanPayload, SealedPlan};
pub use oracle::{
    DisabledOracle, Groth16Oracle, OracleBackend, OracleError, OracleVerdict,
    ProofOracle, StubOracle, VerificationContext,
};
