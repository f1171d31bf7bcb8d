//! Error types for web handlers.
//!
//! [`AppError`] bridges [`OrderError`] and [`AuthError`] to HTTP responses
//! with a `{code, message}` JSON body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_core::OrderError;
use courier_core::identity::AuthError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(Path(id): Path<String>) -> Result<Json<Order>, AppError> {
///     let order_id: OrderId = id.parse()?;
///     Ok(Json(state.orders.get_order_by_id(order_id).await?))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            message.into(),
            "FORBIDDEN".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "CONFLICT".to_string())
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        let status = match &err {
            OrderError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrderError::Conflict(_) | OrderError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            OrderError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrderError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = err.code().to_string();

        // Storage details stay in the logs.
        if matches!(err, OrderError::Persistence(_)) {
            let message = "An internal error occurred".to_string();
            return Self::new(status, message, code).with_source(anyhow::Error::new(err));
        }

        Self::new(status, err.to_string(), code)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => Self::bad_request(err.to_string()),
            AuthError::InvalidToken(_)
            | AuthError::Transport(_)
            | AuthError::InvalidResponse(_) => Self::unauthorized(err.to_string()),
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::order::{OrderId, OrderStatus};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("Order", "123");
        assert_eq!(err.to_string(), "[NOT_FOUND] Order with id 123 not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn order_errors_map_to_statuses() {
        let cases = [
            (
                OrderError::Validation("bad".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
            ),
            (OrderError::Conflict("dup".into()), StatusCode::CONFLICT, "CONFLICT"),
            (OrderError::NotFound(OrderId::new()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                OrderError::InvalidTransition {
                    order_id: OrderId::new(),
                    from: OrderStatus::Cancelled,
                    to: OrderStatus::Completed,
                },
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
            ),
            (
                OrderError::Unauthorized("no".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
            ),
            (
                OrderError::Transport("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "TRANSPORT_ERROR",
            ),
            (
                OrderError::Persistence("io".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "PERSISTENCE_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn persistence_details_are_not_exposed() {
        let app: AppError = OrderError::Persistence("relation \"orders\" is locked".into()).into();
        assert_eq!(app.message, "An internal error occurred");
        assert!(app.source.is_some());
    }

    #[test]
    fn auth_errors_split_between_400_and_401() {
        assert_eq!(AppError::from(AuthError::MissingToken).status(), StatusCode::BAD_REQUEST);
        let rejected = AppError::from(AuthError::InvalidToken("expired".into()));
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        assert!(rejected.message.contains("expired"));
        assert_eq!(
            AppError::from(AuthError::Transport("refused".into())).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
