//! Digests for Verification
//!
//! SHA-256 with domain separation, used for:
//! - Resolution digests over a round's turn records
//! - Anchor payload fingerprints
//!
//! Field-native hashing for commitments lives in `proof::commitment`.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type Digest32 = [u8; 32];

/// Domain separator for round resolution digests.
pub const RESOLUTION_DOMAIN: &[u8] = b"VEILSTAR_BRAWL_RESOLUTION_V1";

/// Incremental hasher with a leading domain separator.
///
/// Order of updates is significant.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for round resolutions.
    pub fn for_resolution() -> Self {
        Self::new(RESOLUTION_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Digest32 {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Digest32 {
    let mut hasher = DomainHasher::new(domain);
    hasher.update_bytes(data);
    hasher.finalize()
}

/// Digest the canonical bincode encoding of a value.
pub fn digest_serialized<T: Serialize>(
    domain: &[u8],
    value: &T,
) -> Result<Digest32, bincode::Error> {
    let encoded = bincode::serialize(value)?;
    Ok(hash_with_domain(domain, &encoded))
}

/// Digest of a resolved round: match id, round number and its turn records.
pub fn resolution_digest<T: Serialize>(
    match_id: &str,
    round: u32,
    records: &[T],
) -> Result<Digest32, bincode::Error> {
    let encoded = bincode::serialize(records)?;
    let mut hasher = DomainHasher::for_resolution();
    hasher.update_str(match_id);
    hasher.update_u32(round);
    hasher.update_bytes(&encoded);
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = DomainHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = DomainHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_domain_separation() {
        let data = [1u8, 2, 3, 4];
        assert_ne!(hash_with_domain(b"DOMAIN_A", &data), hash_with_domain(b"DOMAIN_B", &data));
    }

    #[test]
    fn test_resolution_digest_binds_round() {
        let records = vec![(1u32, "punch"), (2u32, "kick")];
        let a = resolution_digest("m1", 1, &records).unwrap();
        let b = resolution_digest("m1", 2, &records).unwrap();
        let c = resolution_digest("m1", 1, &records).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_length_prefix_prevents_ambiguity() {
        let a = {
            let mut h = DomainHasher::new(b"t");
            h.update_str("ab");
            h.update_str("c");
            h.finalize()
        };
        let b = {
            let mut h = DomainHasher::new(b"t");
            h.update_str("a");
            h.update_str("bc");
            h.finalize()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_serialized_is_stable() {
        let value = vec![10u32, 20, 30];
        assert_eq!(
            digest_serialized(b"x", &value).unwrap(),
            digest_serialized(b"x", &value).unwrap()
        );
    }
}
