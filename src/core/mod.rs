//! Core primitives.
//!
//! Field elements, domain-separated digests and bounded retry. Everything
//! else in the crate builds on these.

pub mod field;
pub mod hash;
pub mod backoff;

// Re-export core types
pub use field::{hash_to_field, FieldElement, FieldError};
pub use hash::{resolution_digest, Digest32};
pub use backoff::{retry, RetryPolicy, Transient};
