//! Network Layer
//!
//! WebSocket gateway for commit, reveal and match events.
//! This layer is **non-deterministic** - all round logic runs through `round/`.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, WalletClaims, validate_token};
pub use protocol::{
    ClientMessage, ServerMessage, AuthRequest, AuthResult, CreateMatchRequest,
    ErrorCode, MatchRef, RoundReply, ServerError, StatusRequest,
};
pub use server::{GameServer, ServerConfig, GameServerError};
