//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON, tagged by `type`. Commit and reveal bodies are the
//! round service's own request types, so the gateway never re-shapes them.

use serde::{Deserialize, Serialize};

use crate::game::state::{MatchFormat, MatchRecord};
use crate::round::error::{ErrorClass, ProtocolError};
use crate::round::events::MatchEvent;
use crate::round::machine::{CommitRequest, RevealRequest, RoundResponse, RoundStatus};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with a wallet-auth JWT.
    Auth(AuthRequest),

    /// Register a match.
    CreateMatch(CreateMatchRequest),

    /// Move a match out of character select.
    StartMatch(MatchRef),

    /// Commit a sealed plan.
    Commit(CommitRequest),

    /// Reveal a committed plan.
    Reveal(RevealRequest),

    /// Query a round's phase.
    Status(StatusRequest),

    /// Receive events for a match.
    Subscribe(MatchRef),

    /// Stop receiving events for a match.
    Unsubscribe(MatchRef),

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// JWT from the wallet-auth provider.
    pub token: String,
    /// Client version for compatibility check.
    #[serde(default)]
    pub client_version: String,
}

/// Match creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMatchRequest {
    /// Match identifier.
    pub match_id: String,
    /// First seat address.
    pub player1: String,
    /// Second seat address.
    pub player2: String,
    /// Best-of-N format.
    pub format: MatchFormat,
}

/// Reference to a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRef {
    /// Match identifier.
    pub match_id: String,
}

/// Round status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    /// Match identifier.
    pub match_id: String,
    /// Round to inspect.
    pub round: u32,
}

impl ClientMessage {
    /// Address this message acts as, if it acts as a player.
    pub fn acting_address(&self) -> Option<&str> {
        match self {
            ClientMessage::Commit(req) => Some(req.address.as_str()),
            ClientMessage::Reveal(req) => Some(req.address.as_str()),
            _ => None,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Match row after create/start.
    Match(MatchRecord),

    /// Commit or reveal outcome.
    Round(RoundReply),

    /// Round phase.
    Status(RoundStatus),

    /// Subscription confirmed.
    Subscribed(MatchRef),

    /// Subscription removed.
    Unsubscribed(MatchRef),

    /// Match event notification.
    Event(MatchEvent),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason text.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Authenticated address.
    pub address: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Commit/reveal outcome for a match and round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReply {
    /// Match identifier.
    pub match_id: String,
    /// Round the request named.
    pub round: u32,
    /// Outcome.
    pub response: RoundResponse,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// HTTP-style status.
    pub status: u16,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: code.status(),
            message: message.into(),
        }
    }
}

impl From<&ProtocolError> for ServerError {
    fn from(err: &ProtocolError) -> Self {
        let code = match err.class() {
            ErrorClass::BadRequest => ErrorCode::BadRequest,
            ErrorClass::Forbidden => ErrorCode::Forbidden,
            ErrorClass::NotFound => ErrorCode::NotFound,
            ErrorClass::Conflict => ErrorCode::Conflict,
            ErrorClass::Unavailable => ErrorCode::Unavailable,
            ErrorClass::Internal => ErrorCode::InternalError,
        };
        Self {
            code,
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Authenticated address differs from the acting address.
    AddressMismatch,
    /// Message did not parse.
    InvalidMessage,
    /// Request failed validation.
    BadRequest,
    /// Caller is not a participant.
    Forbidden,
    /// Unknown match.
    NotFound,
    /// State conflict.
    Conflict,
    /// A collaborator is unavailable.
    Unavailable,
    /// Internal error.
    InternalError,
}

impl ErrorCode {
    /// HTTP-style status for the code.
    pub const fn status(self) -> u16 {
        match self {
            ErrorCode::InvalidMessage | ErrorCode::BadRequest => 400,
            ErrorCode::AuthFailed
            | ErrorCode::NotAuthenticated
            | ErrorCode::TokenExpired
            | ErrorCode::InvalidToken => 401,
            ErrorCode::AddressMismatch | ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::Unavailable => 503,
            ErrorCode::InternalError => 500,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
