//! BN254 Scalar Field Elements
//!
//! Commitments, nonces and public inputs all live in the BN254 scalar field.
//! On the wire and in storage they are canonical 32-byte big-endian values,
//! rendered as `0x`-prefixed hex. Decimal strings are accepted on input.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Field element size in bytes.
pub const FIELD_BYTES: usize = 32;

/// Domain separator for mapping identifiers into the field.
const HASH_TO_FIELD_DOMAIN: &[u8] = b"VEILSTAR_BRAWL_H2F_V1";

/// Errors parsing a field element.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// Input was empty.
    #[error("empty field element")]
    Empty,
    /// Hex digits could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    /// Decimal string contained a non-digit.
    #[error("invalid decimal digit in field element")]
    InvalidDecimal,
    /// More than 32 bytes of magnitude.
    #[error("field element wider than 32 bytes")]
    TooWide,
    /// Value is not reduced modulo the field order.
    #[error("value is not a canonical field element")]
    NonCanonical,
}

/// A canonical BN254 scalar, big-endian, zero-padded to 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FieldElement([u8; FIELD_BYTES]);

impl FieldElement {
    /// The zero element. Reserved as the forced-stun sentinel commitment.
    pub const ZERO: Self = Self([0u8; FIELD_BYTES]);

    /// Build from canonical big-endian bytes, rejecting values >= the modulus.
    pub fn from_be_bytes(bytes: [u8; FIELD_BYTES]) -> Result<Self, FieldError> {
        let reduced = Fr::from_be_bytes_mod_order(&bytes);
        let candidate = Self::from_fr(reduced);
        if candidate.0 != bytes {
            return Err(FieldError::NonCanonical);
        }
        Ok(candidate)
    }

    /// Convert from an arkworks field element.
    pub fn from_fr(value: Fr) -> Self {
        let be = value.into_bigint().to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        let offset = FIELD_BYTES.saturating_sub(be.len());
        out[offset..].copy_from_slice(&be[be.len().saturating_sub(FIELD_BYTES)..]);
        Self(out)
    }

    /// Convert from a small integer.
    pub fn from_u64(value: u64) -> Self {
        Self::from_fr(Fr::from(value))
    }

    /// Convert into an arkworks field element.
    pub fn to_fr(&self) -> Fr {
        Fr::from_be_bytes_mod_order(&self.0)
    }

    /// Raw big-endian bytes.
    pub fn as_bytes(&self) -> &[u8; FIELD_BYTES] {
        &self.0
    }

    /// Is this the zero element?
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; FIELD_BYTES]
    }

    /// `0x`-prefixed lowercase hex, always 64 digits.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse `0x`-prefixed hex (any width up to 32 bytes) or a decimal string.
    pub fn parse(input: &str) -> Result<Self, FieldError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FieldError::Empty);
        }

        let bytes = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
            Some(digits) => parse_hex_magnitude(digits)?,
            None => parse_decimal_magnitude(trimmed)?,
        };

        Self::from_be_bytes(bytes)
    }
}

fn parse_hex_magnitude(digits: &str) -> Result<[u8; FIELD_BYTES], FieldError> {
    if digits.is_empty() {
        return Err(FieldError::Empty);
    }
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    let decoded = hex::decode(&padded).map_err(|e| FieldError::InvalidHex(e.to_string()))?;

    // Strip leading zero bytes so over-padded input still fits.
    let first_nonzero = decoded.iter().position(|b| *b != 0).unwrap_or(decoded.len());
    let magnitude = &decoded[first_nonzero..];
    if magnitude.len() > FIELD_BYTES {
        return Err(FieldError::TooWide);
    }

    let mut out = [0u8; FIELD_BYTES];
    out[FIELD_BYTES - magnitude.len()..].copy_from_slice(magnitude);
    Ok(out)
}

/// Schoolbook base-10 accumulation into a 256-bit big-endian buffer.
fn parse_decimal_magnitude(digits: &str) -> Result<[u8; FIELD_BYTES], FieldError> {
    let mut out = [0u8; FIELD_BYTES];
    for ch in digits.chars() {
        let digit = ch.to_digit(10).ok_or(FieldError::InvalidDecimal)?;
        let mut carry = digit;
        for byte in out.iter_mut().rev() {
            let acc = (*byte as u32) * 10 + carry;
            *byte = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        if carry != 0 {
            return Err(FieldError::TooWide);
        }
    }
    Ok(out)
}

/// Map an arbitrary identifier (match id, wallet address) into the field.
///
/// SHA-256 with a domain separator, reduced modulo the BN254 scalar order.
pub fn hash_to_field(data: &[u8]) -> FieldElement {
    let mut hasher = Sha256::new();
    hasher.update(HASH_TO_FIELD_DOMAIN);
    hasher.update(data);
    let digest: [u8; 32] = hasher.finalize().into();
    FieldElement::from_fr(Fr::from_be_bytes_mod_order(&digest))
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_hex())
    }
}

impl FromStr for FieldElement {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
