//! Wallet Token Validation
//!
//! A connection proves which player address it speaks for with a JWT from
//! the wallet-auth provider. Tokens are only checked here, never issued.
//! The `sub` claim carries the address; issuer, audience and expiry are
//! checked by `jsonwebtoken` from the raw claims.

use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{parse_bool, ConfigError};

/// Token validation settings (`AUTH_*`).
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss`, if set.
    pub issuer: Option<String>,
    /// Required `aud`, if set.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Local testing only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_*` from a variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        Ok(Self {
            issuer: get("AUTH_ISSUER"),
            audience: get("AUTH_AUDIENCE"),
            public_key_pem: get("AUTH_PUBLIC_KEY_PEM"),
            secret: get("AUTH_SECRET"),
            skip_expiry: parse_bool(get("AUTH_SKIP_EXPIRY"), "AUTH_SKIP_EXPIRY")?,
        })
    }

    /// Is there a key to validate with?
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn decoding_key(&self) -> Result<(DecodingKey, Algorithm), AuthError> {
        if let Some(pem) = &self.public_key_pem {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| AuthError::BadKey(e.to_string()))?;
            return Ok((key, Algorithm::RS256));
        }
        match &self.secret {
            Some(secret) => Ok((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)),
            None => Err(AuthError::NotConfigured),
        }
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = !self.skip_expiry;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// The only claim the gateway reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletClaims {
    /// Player address.
    pub sub: String,
}

/// Token rejections.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Configured key does not parse.
    #[error("invalid verification key: {0}")]
    BadKey(String),
    /// Token is past `exp`.
    #[error("token expired")]
    Expired,
    /// Wrong `iss` or `aud`.
    #[error("token not issued for this server")]
    WrongParty,
    /// Signature, encoding or claim shape is wrong.
    #[error("invalid token: {0}")]
    Invalid(String),
    /// `sub` is blank.
    #[error("token carries no address")]
    NoAddress,
}

/// Validate `token` and return the address it speaks for.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<String, AuthError> {
    let (key, algorithm) = config.decoding_key()?;
    let data = decode::<WalletClaims>(token, &key, &config.validation(algorithm)).map_err(|e| {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => AuthError::WrongParty,
            _ => AuthError::Invalid(e.to_string()),
        }
    })?;

    let address = data.claims.sub.trim();
    if address.is_empty() {
        return Err(AuthError::NoAddress);
    }
    Ok(address.to_string())
}
