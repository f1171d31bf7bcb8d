//! Request extractors.
//!
//! - [`BearerToken`]: the `Authorization: Bearer <token>` credential
//! - [`CorrelationId`]: the request's correlation id, set by
//!   [`correlation_id_layer`](crate::middleware::correlation_id_layer) or
//!   taken from the `X-Correlation-ID` header

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use uuid::Uuid;

/// Bearer credential from the `Authorization` header.
///
/// A missing header, a scheme other than `Bearer`, or an empty token are all
/// rejected with `400 Bad Request`.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

impl BearerToken {
    /// Parse the credential out of request headers.
    ///
    /// # Errors
    ///
    /// Returns a `400` [`AppError`] when no usable token is present.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let value = headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::bad_request("no token provided"))?
            .to_str()
            .map_err(|_| AppError::bad_request("authorization header is not valid ASCII"))?;

        let (scheme, token) = value
            .split_once(' ')
            .ok_or_else(|| AppError::bad_request("expected a Bearer token"))?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AppError::bad_request("expected a Bearer token"));
        }

        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::bad_request("no token provided"));
        }
        Ok(Self(token.to_string()))
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens never reach the logs.
impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

/// Correlation ID for request tracing.
///
/// Prefers the id stored by the correlation middleware, then the
/// `X-Correlation-ID` header, and generates a UUID v4 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}
