//! Protocol Configuration
//!
//! Everything the round service and gateway read from the environment.
//! Unset variables take defaults; set-but-malformed values are errors.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::core::backoff::RetryPolicy;
use crate::network::auth::AuthConfig;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// What was expected.
        reason: &'static str,
    },
}

/// Operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OperatingMode {
    /// Verification may be disabled; anchoring optional.
    #[default]
    Standard,
    /// Verification and anchoring are mandatory; deferred or missing
    /// commit-time verification forces reveal-time verification.
    Strict,
}

impl FromStr for OperatingMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(OperatingMode::Standard),
            "strict" => Ok(OperatingMode::Strict),
            _ => Err(()),
        }
    }
}

/// Reveal-time verification policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RevealVerification {
    /// Trust an accepted commit-time verification.
    #[default]
    Reuse,
    /// Verify the reveal proof every time.
    Always,
}

impl FromStr for RevealVerification {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" => Ok(RevealVerification::Reuse),
            "always" => Ok(RevealVerification::Always),
            _ => Err(()),
        }
    }
}

/// Full configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// `BRAWL_MODE`.
    pub mode: OperatingMode,
    /// `ZK_VERIFY_DISABLED`.
    pub verification_disabled: bool,
    /// `ZK_DEFER_COMMIT_VERIFY`.
    pub defer_commit_verify: bool,
    /// `ZK_REVEAL_VERIFY`.
    pub reveal_verify: RevealVerification,
    /// `ZK_GROTH16_VK_PATH`.
    pub groth16_vk_path: Option<PathBuf>,
    /// `RESOLUTION_LOCK_STALE_SECS`.
    pub lock_stale_secs: u32,
    /// `MOVE_TIMEOUT_SECS`.
    pub move_timeout_secs: u32,
    /// `ORACLE_MAX_ATTEMPTS`.
    pub oracle_retry: RetryPolicy,
    /// `ANCHOR_MAX_ATTEMPTS`.
    pub anchor_retry: RetryPolicy,
    /// `ANCHOR_ENABLED`.
    pub anchor_enabled: bool,
    /// `BIND_ADDR`.
    pub bind_addr: SocketAddr,
    /// `AUTH_*`.
    pub auth: AuthConfig,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Standard,
            verification_disabled: false,
            defer_commit_verify: false,
            reveal_verify: RevealVerification::Reuse,
            groth16_vk_path: None,
            lock_stale_secs: 30,
            move_timeout_secs: 60,
            oracle_retry: RetryPolicy::default(),
            anchor_retry: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            anchor_enabled: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            auth: AuthConfig::default(),
        }
    }
}

impl ProtocolConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let mut oracle_retry = defaults.oracle_retry;
        oracle_retry.max_attempts = parse_positive(get("ORACLE_MAX_ATTEMPTS"), "ORACLE_MAX_ATTEMPTS", 3)?;
        let mut anchor_retry = defaults.anchor_retry;
        anchor_retry.max_attempts = parse_positive(get("ANCHOR_MAX_ATTEMPTS"), "ANCHOR_MAX_ATTEMPTS", 5)?;

        let config = Self {
            mode: parse_with(get("BRAWL_MODE"), "BRAWL_MODE", "expected standard or strict", defaults.mode)?,
            verification_disabled: parse_bool(get("ZK_VERIFY_DISABLED"), "ZK_VERIFY_DISABLED")?,
            defer_commit_verify: parse_bool(get("ZK_DEFER_COMMIT_VERIFY"), "ZK_DEFER_COMMIT_VERIFY")?,
            reveal_verify: parse_with(
                get("ZK_REVEAL_VERIFY"),
                "ZK_REVEAL_VERIFY",
                "expected reuse or always",
                defaults.reveal_verify,
            )?,
            groth16_vk_path: get("ZK_GROTH16_VK_PATH").map(PathBuf::from),
            lock_stale_secs: parse_positive(get("RESOLUTION_LOCK_STALE_SECS"), "RESOLUTION_LOCK_STALE_SECS", 30)?,
            move_timeout_secs: parse_positive(get("MOVE_TIMEOUT_SECS"), "MOVE_TIMEOUT_SECS", 60)?,
            oracle_retry,
            anchor_retry,
            anchor_enabled: parse_bool(get("ANCHOR_ENABLED"), "ANCHOR_ENABLED")?,
            bind_addr: parse_with(get("BIND_ADDR"), "BIND_ADDR", "expected host:port", defaults.bind_addr)?,
            auth: AuthConfig::from_lookup(&lookup)?,
        };
        if config.is_strict() && config.groth16_vk_path.is_none() {
            return Err(ConfigError::Invalid {
                var: "ZK_GROTH16_VK_PATH",
                value: String::new(),
                reason: "strict mode requires a Groth16 verifying key",
            });
        }
        Ok(config)
    }

    /// Lock staleness threshold.
    pub fn lock_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.lock_stale_secs))
    }

    /// Per-round move deadline.
    pub fn move_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.move_timeout_secs))
    }

    /// How often the deadline sweeper runs.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.move_timeout_secs.clamp(1, 5)))
    }

    /// Is this strict mode?
    pub fn is_strict(&self) -> bool {
        self.mode == OperatingMode::Strict
    }
}

fn parse_with<T: FromStr>(
    raw: Option<String>,
    var: &'static str,
    reason: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { var, value, reason }),
    }
}

/// Parse a boolean flag. Unset is false.
pub(crate) fn parse_bool(raw: Option<String>, var: &'static str) -> Result<bool, ConfigError> {
    let Some(value) = raw else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "expected a boolean",
        }),
    }
}

fn parse_positive(raw: Option<String>, var: &'static str, default: u32) -> Result<u32, ConfigError> {
    let parsed = parse_with(raw.clone(), var, "expected a positive integer", default)?;
    if parsed == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: raw.unwrap_or_default(),
            reason: "expected a positive integer",
        });
    }
    Ok(parsed)
}
