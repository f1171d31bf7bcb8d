//! Route tables for the two services.

use crate::handlers::{gateway, health, orders};
use crate::middleware::correlation_id_layer;
use crate::state::{AppState, GatewayState};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Routes of the order service.
pub fn order_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/available", get(orders::get_available_orders))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/orders/:order_id/cancel", post(orders::cancel_order))
        .route("/orders/:order_id/complete", post(orders::complete_order))
        .route("/users/:user_id/orders", get(orders::get_user_orders))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

/// Routes of the notification gateway.
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(gateway::ws_handler))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .layer(correlation_id_layer())
        .with_state(state)
}
