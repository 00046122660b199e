//! Proof Public Inputs
//!
//! Field elements a proof is verified against. Element 0 is always the bound
//! commitment. A full circuit vector also carries the verification context:
//!
//! ```text
//! [commitment, matchField, playerField, round, turn]
//! ```

use ark_bn254::Fr;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::core::field::{hash_to_field, FieldElement, FieldError};

/// Number of elements in a full circuit input vector.
pub const CIRCUIT_INPUT_COUNT: usize = 5;

/// Errors decoding public inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublicInputsError {
    /// No elements supplied.
    #[error("public inputs are empty")]
    Empty,
    /// An element failed to parse.
    #[error("public input {index}: {source}")]
    Field {
        /// Position in the list.
        index: usize,
        /// Parse failure.
        source: FieldError,
    },
}

/// Ordered list of public field elements.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PublicInputs(Vec<FieldElement>);

impl PublicInputs {
    /// Wrap a non-empty list.
    pub fn new(elements: Vec<FieldElement>) -> Result<Self, PublicInputsError> {
        if elements.is_empty() {
            return Err(PublicInputsError::Empty);
        }
        Ok(Self(elements))
    }

    /// Only the commitment.
    pub fn commitment_only(commitment: FieldElement) -> Self {
        Self(vec![commitment])
    }

    /// Full circuit vector for a commitment in a given context.
    pub fn for_context(commitment: FieldElement, match_id: &str, player: &str, round: u32, turn: u32) -> Self {
        Self(vec![
            commitment,
            hash_to_field(match_id.as_bytes()),
            hash_to_field(player.as_bytes()),
            FieldElement::from_u64(u64::from(round)),
            FieldElement::from_u64(u64::from(turn)),
        ])
    }

    /// Parse hex or decimal strings.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, PublicInputsError> {
        let elements = raw
            .iter()
            .enumerate()
            .map(|(index, s)| {
                FieldElement::parse(s.as_ref()).map_err(|source| PublicInputsError::Field { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(elements)
    }

    /// The commitment this proof is bound to.
    pub fn bound_commitment(&self) -> &FieldElement {
        &self.0[0]
    }

    /// All elements.
    pub fn elements(&self) -> &[FieldElement] {
        &self.0
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; construction rejects empty lists.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Arkworks view for a verifier.
    pub fn to_fr_vec(&self) -> Vec<Fr> {
        self.0.iter().map(FieldElement::to_fr).collect()
    }
}

/// Wire form: a list of scalars, or a single scalar for the commitment.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPublicInputs {
    List(Vec<String>),
    Single(String),
}

impl<'de> Deserialize<'de> for PublicInputs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match RawPublicInputs::deserialize(deserializer)? {
            RawPublicInputs::List(list) => Self::parse(&list),
            RawPublicInputs::Single(one) => Self::parse(&[one]),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_commitment_is_first() {
        let c = FieldElement::from_u64(99);
        let inputs = PublicInputs::for_context(c, "m1", "alice", 2, 1);
        assert_eq!(inputs.bound_commitment(), &c);
        assert_eq!(inputs.len(), CIRCUIT_INPUT_COUNT);
        assert_eq!(inputs.elements()[3], FieldElement::from_u64(2));
    }

    #[test]
    fn test_context_separates_matches() {
        let c = FieldElement::from_u64(1);
        assert_ne!(
            PublicInputs::for_context(c, "m1", "alice", 1, 1),
            PublicInputs::for_context(c, "m2", "alice", 1, 1)
        );
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(PublicInputs::new(vec![]), Err(PublicInputsError::Empty));
        let none: [&str; 0] = [];
        assert_eq!(PublicInputs::parse(&none), Err(PublicInputsError::Empty));
    }

    #[test]
    fn test_parse_reports_index() {
        let err = PublicInputs::parse(&["0x01", "nope"]).unwrap_err();
        assert!(matches!(err, PublicInputsError::Field { index: 1, .. }));
    }

    #[test]
    fn test_deserialize_list_or_single() {
        let list: PublicInputs = serde_json::from_str(r#"["0x05", "6"]"#).unwrap();
        assert_eq!(list.len(), 2);
        let single: PublicInputs = serde_json::from_str(r#""0x05""#).unwrap();
        assert_eq!(single.bound_commitment(), &FieldElement::from_u64(5));
        assert!(serde_json::from_str::<PublicInputs>("[]").is_err());
    }
}
