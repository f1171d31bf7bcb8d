//! Order aggregate and its lifecycle state machine.
//!
//! ```text
//! pending ──┬──► matching ──► signed ──┬──► cancelled
//!           │        │                 │
//!           └────────┴─────────────────┴──► completed
//! ```
//!
//! `cancelled` and `completed` are terminal. `matching` and `signed` are
//! reserved for assignment logic that lives outside this crate; nothing here
//! drives an order into them, but the transition table accepts them so a
//! future producer can.

use crate::error::OrderError;
use crate::time_gap::TimeGap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Generate a fresh random order id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OrderId {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| OrderError::Validation(format!("invalid order_id '{s}': {e}")))
    }
}

/// Identity of a user (client or agent) as issued by the auth service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a random user id. Mostly useful in tests.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UserId {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| OrderError::Validation(format!("invalid user_id '{s}': {e}")))
    }
}

/// Lifecycle status of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Waiting for an agent.
    Pending,
    /// An agent is being matched (reserved).
    Matching,
    /// An agent has signed on (reserved).
    Signed,
    /// Cancelled by the owner. Terminal.
    Cancelled,
    /// Fulfilled. Terminal.
    Completed,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Matching,
        Self::Signed,
        Self::Cancelled,
        Self::Completed,
    ];

    /// Statuses that count towards the one-active-order-per-user rule.
    pub const ACTIVE: [Self; 3] = [Self::Pending, Self::Matching, Self::Signed];

    /// Wire and column representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matching => "matching",
            Self::Signed => "signed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Whether the order still occupies the user's single active slot.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Matching | Self::Signed)
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Matching | Self::Signed)
            | (Self::Matching, Self::Signed)
            | (
                Self::Pending | Self::Matching | Self::Signed,
                Self::Cancelled | Self::Completed,
            ) => true,
            _ => false,
        }
    }

    /// Every status from which `target` is reachable in one step.
    ///
    /// Stores use this to express a transition as a single conditional update.
    #[must_use]
    pub fn sources_of(target: Self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(target))
            .collect()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrderError::Validation(format!("unknown order status '{s}'")))
    }
}

/// A ride/delivery order.
///
/// Serialized field names match the public wire shape, which is shared by the
/// HTTP API and the broker payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Generated on insert, immutable.
    pub order_id: OrderId,
    /// Owner, immutable.
    pub user_id: UserId,
    /// Assigned agent, if any.
    #[serde(default)]
    pub agent_id: Option<UserId>,
    /// Pickup address.
    #[serde(rename = "order_address")]
    pub address: String,
    /// Free-form location descriptor.
    #[serde(rename = "order_location")]
    pub location: String,
    /// When the order should be fulfilled.
    #[serde(rename = "order_date")]
    pub scheduled_date: DateTime<Utc>,
    /// Accepted tolerance around `scheduled_date`.
    #[serde(rename = "order_time_gap")]
    pub time_gap: TimeGap,
    /// Current lifecycle status.
    #[serde(rename = "order_status")]
    pub status: OrderStatus,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Materialize a validated [`NewOrder`] as a `pending` order.
    #[must_use]
    pub fn from_new(new: NewOrder, order_id: OrderId, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            user_id: new.user_id,
            agent_id: None,
            address: new.address,
            location: new.location,
            scheduled_date: new.scheduled_date,
            time_gap: new.time_gap,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle transition in place.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::InvalidTransition`] when the current status does
    /// not permit moving to `to`.
    pub fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                order_id: self.order_id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

/// Validated input for creating an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    /// Owner of the new order.
    pub user_id: UserId,
    /// Pickup address, never blank.
    pub address: String,
    /// Free-form location descriptor.
    pub location: String,
    /// Scheduled instant.
    pub scheduled_date: DateTime<Utc>,
    /// Tolerance window.
    pub time_gap: TimeGap,
}

/// Unvalidated create request as it arrives over the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Owner id as a UUID string.
    pub user_id: String,
    /// Pickup address.
    pub order_address: String,
    /// Free-form location descriptor.
    #[serde(default)]
    pub order_location: String,
    /// RFC 3339 timestamp.
    pub order_date: String,
    /// Duration such as `30m` or `1h30m`.
    pub order_time_gap: String,
}

impl CreateOrderRequest {
    /// Validate and convert into a [`NewOrder`].
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Validation`] on a malformed user id, a blank
    /// address, a date that is not RFC 3339, or an unparsable duration.
    pub fn validate(self) -> Result<NewOrder, OrderError> {
        let user_id: UserId = self.user_id.trim().parse()?;

        let address = self.order_address.trim().to_string();
        if address.is_empty() {
            return Err(OrderError::Validation(
                "order_address must not be empty".to_string(),
            ));
        }

        let scheduled_date = DateTime::parse_from_rfc3339(self.order_date.trim())
            .map_err(|e| {
                OrderError::Validation(format!("invalid order_date '{}': {e}", self.order_date))
            })?
            .with_timezone(&Utc);

        let time_gap: TimeGap = self
            .order_time_gap
            .parse()
            .map_err(|e| OrderError::Validation(format!("invalid order_time_gap: {e}")))?;

        Ok(NewOrder {
            user_id,
            address,
            location: self.order_location.trim().to_string(),
            scheduled_date,
            time_gap,
        })
    }
}
