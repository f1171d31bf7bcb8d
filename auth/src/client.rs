//! reqwest client for the auth gateway.

use async_trait::async_trait;
use courier_core::identity::{AuthError, Identity, TokenValidator};
use courier_core::order::UserId;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role assumed when the auth service omits one.
pub const DEFAULT_ROLE: &str = "client";

#[derive(Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ValidateResponse {
    success: bool,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct RegisterResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Auth gateway client.
///
/// # Example
///
/// ```no_run
/// use courier_auth::AuthClient;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let auth = AuthClient::new("http://localhost:9100", Duration::from_secs(5))?;
/// let identity = auth.validate_token("eyJ...").await?;
/// println!("user {}", identity.user_id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct AuthClient {
    /// HTTP client with the request timeout applied.
    http_client: Client,

    /// Base URL without trailing slash.
    base_url: String,
}

impl AuthClient {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(base_url, http_client))
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, http_client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Resolve a bearer token to the user it was issued for.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingToken`] for an empty token (no request is sent)
    /// - [`AuthError::InvalidToken`] when the service rejects it
    /// - [`AuthError::Transport`] when the service is unreachable or failing
    /// - [`AuthError::InvalidResponse`] when the answer cannot be used
    pub async fn validate_token(&self, token: &str) -> Result<Identity, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let response = self
            .http_client
            .post(self.url("/auth/validate"))
            .json(&ValidateRequest { token })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if !body.success {
            let reason = body
                .error
                .unwrap_or_else(|| "invalid or expired token".to_string());
            tracing::debug!(reason = %reason, "Token rejected by auth service");
            return Err(AuthError::InvalidToken(reason));
        }

        let raw_user_id = body
            .user_id
            .ok_or_else(|| AuthError::InvalidResponse("missing user_id".to_string()))?;
        let user_id = raw_user_id
            .parse::<uuid::Uuid>()
            .map(UserId::from_uuid)
            .map_err(|e| AuthError::InvalidResponse(format!("user_id '{raw_user_id}': {e}")))?;

        Ok(Identity {
            user_id,
            role: body
                .role
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
        })
    }

    /// Exchange credentials for a bearer token.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] for rejected credentials, otherwise as
    /// [`validate_token`](Self::validate_token).
    pub async fn login(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let response = self
            .http_client
            .post(self.url("/auth/login"))
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if body.token.is_empty() {
            return Err(AuthError::InvalidResponse("empty token".to_string()));
        }
        Ok(body.token)
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidResponse`] if the service reports failure,
    /// otherwise as [`validate_token`](Self::validate_token).
    pub async fn register(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let response = self
            .http_client
            .post(self.url("/auth/register"))
            .json(&Credentials { email, password })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if body.success {
            Ok(())
        } else {
            Err(AuthError::InvalidResponse(
                body.error.unwrap_or_else(|| "registration refused".to_string()),
            ))
        }
    }
}

#[async_trait]
impl TokenValidator for AuthClient {
    async fn validate_token(&self, token: &str) -> Result<Identity, AuthError> {
        Self::validate_token(self, token).await
    }
}

/// 4xx means the caller's credentials were refused, 5xx that the service
/// itself is failing.
fn status_error(status: StatusCode, body: &str) -> AuthError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_client_error() {
        AuthError::InvalidToken(detail)
    } else if status.is_server_error() {
        AuthError::Transport(detail)
    } else {
        AuthError::InvalidResponse(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = AuthClient::with_client("http://auth:9100/", Client::new());
        assert_eq!(client.url("/auth/validate"), "http://auth:9100/auth/validate");
    }

    #[test]
    fn status_classes_map_to_errors() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            AuthError::InvalidToken(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "down"),
            AuthError::Transport(_)
        ));
        assert!(matches!(
            status_error(StatusCode::MOVED_PERMANENTLY, ""),
            AuthError::InvalidResponse(_)
        ));
    }
}
