//! Caller identity as resolved by the remote auth service.

use crate::error::OrderError;
use crate::order::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who a bearer token belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Authenticated user.
    pub user_id: UserId,
    /// Role string issued by the auth service (e.g. `client`, `agent`).
    pub role: String,
}

/// Token validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token was supplied.
    #[error("missing bearer token")]
    MissingToken,

    /// The auth service rejected the token.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The auth service could not be reached.
    #[error("auth service unavailable: {0}")]
    Transport(String),

    /// The auth service answered with something unusable.
    #[error("invalid auth response: {0}")]
    InvalidResponse(String),
}

impl From<AuthError> for OrderError {
    fn from(err: AuthError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

/// Exchanges an opaque bearer token for an [`Identity`].
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`]; callers treat every variant as unauthorized.
    async fn validate_token(&self, token: &str) -> Result<Identity, AuthError>;
}
