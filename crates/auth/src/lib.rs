#![forbid(unsafe_code)]

use async_trait::async_trait;
use uuid::Uuid;

pub mod capability;
pub mod invite;
pub mod jwt;

pub use capability::{
    capabilities, evaluate, may_act_on_file, Action, Capabilities, Decision, DenyReason,
    FileOwnership,
};
pub use invite::{generate_invite_token, INVITE_TOKEN_BYTES};
pub use jwt::{SessionClaims, SessionTokenValidator, MIN_SECRET_LEN};

/// Identity of the caller, established from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub account: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    ExpiredToken,
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate_token(&self, token: &str) -> Result<AuthContext, AuthError>;
}
