//! Sealed Plan Payload
//!
//! At commit time a client uploads its plan as an opaque, hex-encoded blob.
//! The blob is a single tagged JSON document, decoded once when the commit
//! arrives. Unknown formats and unknown fields are rejected.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::game::moves::{Move, MovePlan};
use crate::game::surge::SurgeCard;

/// Upper bound on a sealed payload.
pub const MAX_SEALED_PLAN_BYTES: usize = 4096;

/// Errors decoding a sealed plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Blob was empty.
    #[error("sealed plan is empty")]
    Empty,
    /// Blob exceeded `MAX_SEALED_PLAN_BYTES`.
    #[error("sealed plan too large ({0} bytes)")]
    TooLarge(usize),
    /// Hex layer failed.
    #[error("sealed plan is not valid hex: {0}")]
    Hex(String),
    /// JSON layer failed (unknown format, unknown field, bad plan).
    #[error("sealed plan payload rejected: {0}")]
    Payload(String),
    /// Declared move disagrees with the plan for the commit turn.
    #[error("declared move {declared} does not match plan move {planned} for turn {turn}")]
    MoveMismatch {
        /// Turn checked.
        turn: u32,
        /// The `move` field.
        declared: Move,
        /// `movePlan[turn - 1]`.
        planned: Move,
    },
}

/// Payload format tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanFormat {
    /// JSON `{format, move, movePlan, surgeCardId}`.
    #[serde(rename = "plan-v1")]
    V1,
}

/// Decoded plan payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanPayload {
    /// Format tag.
    pub format: PlanFormat,
    /// Move for the commit turn.
    #[serde(rename = "move")]
    pub current_move: Move,
    /// Ten-move plan.
    pub move_plan: MovePlan,
    /// Optional surge card.
    #[serde(default)]
    pub surge_card_id: Option<SurgeCard>,
}

impl PlanPayload {
    /// Build a v1 payload whose current move is the plan's move at `turn`.
    pub fn new(plan: MovePlan, surge: Option<SurgeCard>, turn: u32) -> Self {
        Self {
            format: PlanFormat::V1,
            current_move: plan.at_turn(turn).unwrap_or(Move::Stunned),
            move_plan: plan,
            surge_card_id: surge,
        }
    }

    /// Check `move` against the plan entry for `turn`.
    pub fn check_turn(&self, turn: u32) -> Result<(), PlanError> {
        let planned = self.move_plan.at_turn(turn).unwrap_or(Move::Stunned);
        if planned != self.current_move {
            return Err(PlanError::MoveMismatch {
                turn,
                declared: self.current_move,
                planned,
            });
        }
        Ok(())
    }
}

/// Opaque sealed plan bytes as uploaded at commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SealedPlan(Vec<u8>);

impl SealedPlan {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PlanError> {
        if bytes.is_empty() {
            return Err(PlanError::Empty);
        }
        if bytes.len() > MAX_SEALED_PLAN_BYTES {
            return Err(PlanError::TooLarge(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Decode from hex, with or without `0x`.
    pub fn from_hex(input: &str) -> Result<Self, PlanError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| PlanError::Hex(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Seal a payload.
    pub fn seal(payload: &PlanPayload) -> Result<Self, PlanError> {
        let bytes = serde_json::to_vec(payload).map_err(|e| PlanError::Payload(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Decode the payload.
    pub fn open(&self) -> Result<PlanPayload, PlanError> {
        serde_json::from_slice(&self.0).map_err(|e| PlanError::Payload(e.to_string()))
    }

    /// `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for SealedPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SealedPlan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
