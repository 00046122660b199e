//! Proof Oracle
//!
//! Opaque verifier boundary. The state machine hands over proof bytes,
//! public inputs and a context naming the match, player, round and turn, and
//! gets back accept/reject plus the backend that decided.
//!
//! Rejection is a normal result, not an error. `OracleError` is reserved for
//! transient failures (timeouts, backend unavailable) that the caller
//! retries with backoff.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use ark_snark::SNARK;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::backoff::Transient;
use crate::proof::public_inputs::{PublicInputs, CIRCUIT_INPUT_COUNT};

/// Backend label when verification is switched off.
pub const BACKEND_DISABLED: &str = "disabled";

/// Backend label for the format-only stub.
pub const BACKEND_STUB: &str = "stub";

/// Backend label for BN254 Groth16.
pub const BACKEND_GROTH16: &str = "groth16-bn254";

/// Default bound on one Groth16 verification.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// What a proof is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationContext {
    /// Match identifier.
    pub match_id: String,
    /// Claimed signer address.
    pub player: String,
    /// Round number.
    pub round: u32,
    /// Turn at commit time.
    pub turn: u32,
}

/// Oracle answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleVerdict {
    /// Did the proof verify?
    pub accepted: bool,
    /// Which backend decided.
    pub backend: String,
}

impl OracleVerdict {
    fn accept(backend: &str) -> Self {
        Self {
            accepted: true,
            backend: backend.to_string(),
        }
    }

    fn reject(backend: &str) -> Self {
        Self {
            accepted: false,
            backend: backend.to_string(),
        }
    }
}

/// Oracle failures. Rejection is not one of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Verification exceeded its time bound.
    #[error("proof verification timed out")]
    Timeout,
    /// Backend could not run.
    #[error("proof backend unavailable: {0}")]
    Unavailable(String),
    /// Verifying key could not be loaded.
    #[error("proof backend setup failed: {0}")]
    Setup(String),
}

impl Transient for OracleError {
    fn is_transient(&self) -> bool {
        matches!(self, OracleError::Timeout | OracleError::Unavailable(_))
    }
}

/// Verifier boundary.
pub trait ProofOracle: Send + Sync + 'static {
    /// Backend label reported in verdicts.
    fn backend(&self) -> &'static str;

    /// Does an accepted verdict mean the proof was checked cryptographically?
    /// Strict mode only runs on backends that answer yes.
    fn is_sound(&self) -> bool {
        false
    }

    /// Verify `proof` against `public_inputs` in `context`.
    fn verify(
        &self,
        proof: &[u8],
        public_inputs: &PublicInputs,
        context: &VerificationContext,
    ) -> impl Future<Output = Result<OracleVerdict, OracleError>> + Send;
}

// =============================================================================
// DISABLED / STUB
// =============================================================================

/// Accepts everything. Local testing only; refused in strict mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOracle;

impl ProofOracle for DisabledOracle {
    fn backend(&self) -> &'static str {
        BACKEND_DISABLED
    }

    async fn verify(
        &self,
        _proof: &[u8],
        _public_inputs: &PublicInputs,
        _context: &VerificationContext,
    ) -> Result<OracleVerdict, OracleError> {
        Ok(OracleVerdict::accept(BACKEND_DISABLED))
    }
}

/// Accepts any non-empty proof. Stands in until a verifying key is deployed.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubOracle;

impl ProofOracle for StubOracle {
    fn backend(&self) -> &'static str {
        BACKEND_STUB
    }

    async fn verify(
        &self,
        proof: &[u8],
        _public_inputs: &PublicInputs,
        _context: &VerificationContext,
    ) -> Result<OracleVerdict, OracleError> {
        if proof.is_empty() {
            return Ok(OracleVerdict::reject(BACKEND_STUB));
        }
        Ok(OracleVerdict::accept(BACKEND_STUB))
    }
}

// =============================================================================
// GROTH16
// =============================================================================

/// BN254 Groth16 verifier.
///
/// Circuit public inputs are `[commitment, matchField, playerField, round,
/// turn]`. Callers may send only the commitment; the remaining four are
/// derived from the context. If all five are sent, the context-derived
/// elements must match them.
#[derive(Clone)]
pub struct Groth16Oracle {
    pvk: Arc<PreparedVerifyingKey<Bn254>>,
    timeout: Duration,
}

impl Groth16Oracle {
    /// Build from a verifying key.
    pub fn new(vk: VerifyingKey<Bn254>) -> Result<Self, OracleError> {
        if vk.gamma_abc_g1.len() != CIRCUIT_INPUT_COUNT + 1 {
            return Err(OracleError::Setup(format!(
                "verifying key expects {} public inputs, circuit has {}",
                vk.gamma_abc_g1.len().saturating_sub(1),
                CIRCUIT_INPUT_COUNT
            )));
        }
        let pvk = Groth16::<Bn254>::process_vk(&vk).map_err(|e| OracleError::Setup(e.to_string()))?;
        Ok(Self {
            pvk: Arc::new(pvk),
            timeout: DEFAULT_VERIFY_TIMEOUT,
        })
    }

    /// Build from compressed verifying key bytes.
    pub fn from_vk_bytes(bytes: &[u8]) -> Result<Self, OracleError> {
        let vk = VerifyingKey::<Bn254>::deserialize_compressed(bytes)
            .map_err(|e| OracleError::Setup(format!("verifying key: {}", e)))?;
        Self::new(vk)
    }

    /// Load compressed verifying key bytes from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OracleError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| OracleError::Setup(format!("{}: {}", path.display(), e)))?;
        Self::from_vk_bytes(&bytes)
    }

    /// Override the verification time bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full input vector, or `None` when supplied inputs contradict the context.
    fn circuit_inputs(public_inputs: &PublicInputs, context: &VerificationContext) -> Option<Vec<Fr>> {
        let expected = PublicInputs::for_context(
            *public_inputs.bound_commitment(),
            &context.match_id,
            &context.player,
            context.round,
            context.turn,
        );
        match public_inputs.len() {
            1 => Some(expected.to_fr_vec()),
            CIRCUIT_INPUT_COUNT if *public_inputs == expected => Some(expected.to_fr_vec()),
            _ => None,
        }
    }
}

impl ProofOracle for Groth16Oracle {
    fn backend(&self) -> &'static str {
        BACKEND_GROTH16
    }

    fn is_sound(&self) -> bool {
        true
    }

    async fn verify(
        &self,
        proof: &[u8],
        public_inputs: &PublicInputs,
        context: &VerificationContext,
    ) -> Result<OracleVerdict, OracleError> {
        let Some(inputs) = Self::circuit_inputs(public_inputs, context) else {
            debug!(match_id = %context.match_id, "public inputs do not match verification context");
            return Ok(OracleVerdict::reject(BACKEND_GROTH16));
        };

        let proof = match Proof::<Bn254>::deserialize_compressed(proof) {
            Ok(proof) => proof,
            Err(e) => {
                debug!(match_id = %context.match_id, error = %e, "malformed groth16 proof");
                return Ok(OracleVerdict::reject(BACKEND_GROTH16));
            }
        };

        let pvk = Arc::clone(&self.pvk);
        let task = tokio::task::spawn_blocking(move || {
            Groth16::<Bn254>::verify_with_processed_vk(&pvk, &inputs, &proof)
        });

        let accepted = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(OracleError::Timeout),
            Ok(Err(join)) => return Err(OracleError::Unavailable(join.to_string())),
            Ok(Ok(Err(e))) => {
                warn!(match_id = %context.match_id, error = %e, "groth16 verification error");
                false
            }
            Ok(Ok(Ok(valid))) => valid,
        };

        Ok(if accepted {
            OracleVerdict::accept(BACKEND_GROTH16)
        } else {
            OracleVerdict::reject(BACKEND_GROTH16)
        })
    }
}

// =============================================================================
// RUNTIME SELECTION
// =============================================================================

/// Oracle chosen from configuration at startup.
#[derive(Clone)]
pub enum OracleBackend {
    /// Verification disabled.
    Disabled(DisabledOracle),
    /// Format-only stub.
    Stub(StubOracle),
    /// Real verifier.
    Groth16(Groth16Oracle),
}

impl OracleBackend {
    /// Pick a backend: disabled wins, then a verifying key, then the stub.
    pub fn select(disabled: bool, vk_path: Option<&Path>) -> Result<Self, OracleError> {
        if disabled {
            return Ok(OracleBackend::Disabled(DisabledOracle));
        }
        match vk_path {
            Some(path) => Ok(OracleBackend::Groth16(Groth16Oracle::load(path)?)),
            None => Ok(OracleBackend::Stub(StubOracle)),
        }
    }
}

impl ProofOracle for OracleBackend {
    fn backend(&self) -> &'static str {
        match self {
            OracleBackend::Disabled(o) => o.backend(),
            OracleBackend::Stub(o) => o.backend(),
            OracleBackend::Groth16(o) => o.backend(),
        }
    }

    fn is_sound(&self) -> bool {
        matches!(self, OracleBackend::Groth16(_))
    }

    async fn verify(
        &self,
        proof: &[u8],
        public_inputs: &PublicInputs,
        context: &VerificationContext,
    ) -> Result<OracleVerdict, OracleError> {
        match self {
            OracleBackend::Disabled(o) => o.verify(proof, public_inputs, context).await,
            OracleBackend::Stub(o) => o.verify(proof, public_inputs, context).await,
            OracleBackend::Groth16(o) => o.verify(proof, public_inputs, context).await,
        }
    }
}
