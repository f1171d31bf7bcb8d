//! Order service remote-call surface.
//!
//! | route                              | response                 |
//! |------------------------------------|--------------------------|
//! | `POST /orders`                     | `{success: true, order}` |
//! | `GET /users/:user_id/orders`       | `{orders}`               |
//! | `GET /orders/available`            | `{orders}`               |
//! | `GET /orders/:order_id`            | `{order}`                |
//! | `POST /orders/:order_id/cancel`    | `{success: true}`        |
//! | `POST /orders/:order_id/complete`  | `{success: true}`        |

use crate::error::AppError;
use crate::extractors::CorrelationId;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use courier_core::order::{CreateOrderRequest, Order, OrderId, UserId};
use serde::Serialize;

/// `{success, order}` returned by `CreateOrder`.
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    /// Always `true`; failures use the error body.
    pub success: bool,
    /// The stored order.
    pub order: Order,
}

/// `{orders}` returned by the listings.
#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    /// Matching orders.
    pub orders: Vec<Order>,
}

/// `{order}` returned by `GetOrderById`.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    /// The order.
    pub order: Order,
}

/// `{success}` returned by the transitions.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// Always `true`; failures use the error body.
    pub success: bool,
}

/// `POST /orders`
///
/// # Errors
///
/// 422 for malformed input, 409 when the user already has an active order.
pub async fn create_order(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    let Json(request) = body.map_err(|e| AppError::validation(e.body_text()))?;

    let order = state.orders.create_order(request).await?;
    tracing::info!(
        correlation_id = %correlation_id.0,
        order_id = %order.order_id,
        user_id = %order.user_id,
        "Order created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            success: true,
            order,
        }),
    ))
}

/// `GET /users/:user_id/orders`, newest first.
///
/// # Errors
///
/// 422 for a malformed user id.
pub async fn get_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<OrdersResponse>, AppError> {
    let user_id: UserId = user_id.parse()?;
    let orders = state.orders.get_user_orders(user_id).await?;
    Ok(Json(OrdersResponse { orders }))
}

/// `GET /orders/available`: every `pending` order, oldest first.
///
/// # Errors
///
/// 500 if the store fails.
pub async fn get_available_orders(
    State(state): State<AppState>,
) -> Result<Json<OrdersResponse>, AppError> {
    let orders = state.orders.get_available_orders().await?;
    Ok(Json(OrdersResponse { orders }))
}

/// `GET /orders/:order_id`
///
/// # Errors
///
/// 422 for a malformed id, 404 when no such order exists.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let order_id: OrderId = order_id.parse()?;
    let order = state.orders.get_order_by_id(order_id).await?;
    Ok(Json(OrderResponse { order }))
}

/// `POST /orders/:order_id/cancel`
///
/// # Errors
///
/// 404 for an unknown order, 409 when the order is already terminal.
pub async fn cancel_order(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(order_id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let order_id: OrderId = order_id.parse()?;
    state.orders.cancel_order(order_id).await?;
    tracing::info!(correlation_id = %correlation_id.0, order_id = %order_id, "Order cancelled");
    Ok(Json(SuccessResponse { success: true }))
}

/// `POST /orders/:order_id/complete`
///
/// # Errors
///
/// 404 for an unknown order, 409 when the order is already terminal.
pub async fn complete_order(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Path(order_id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let order_id: OrderId = order_id.parse()?;
    state.orders.complete_order(order_id).await?;
    tracing::info!(correlation_id = %correlation_id.0, order_id = %order_id, "Order completed");
    Ok(Json(SuccessResponse { success: true }))
}
