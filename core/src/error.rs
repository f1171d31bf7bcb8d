//! Error taxonomy shared by the order service and its adapters.

use crate::event_bus::EventBusError;
use crate::order::{OrderId, OrderStatus};
use thiserror::Error;

/// Errors surfaced by order operations.
///
/// Adapters wrap their native failures into [`OrderError::Persistence`] or
/// [`OrderError::Transport`]; the business variants are produced by the
/// service and the state machine.
#[derive(Error, Debug, Clone)]
pub enum OrderError {
    /// Malformed input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Business rule violation, e.g. a second active order for one user.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The order does not exist.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// The current status does not permit the requested transition.
    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Order being transitioned.
        order_id: OrderId,
        /// Current status.
        from: OrderStatus,
        /// Requested status.
        to: OrderStatus,
    },

    /// Missing, invalid or expired credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A downstream service or the broker could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store failed to read or write.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl OrderError {
    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// Conflict raised when a user already holds an active order.
    #[must_use]
    pub fn active_order_exists(user_id: impl std::fmt::Display) -> Self {
        Self::Conflict(format!("user {user_id} already has an active order"))
    }
}

impl From<EventBusError> for OrderError {
    fn from(err: EventBusError) -> Self {
        Self::Transport(err.to_string())
    }
}
