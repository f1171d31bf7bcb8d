//! HTTP and WebSocket handlers.

pub mod gateway;
pub mod health;
pub mod orders;

pub use gateway::ws_handler;
pub use health::{health_check, readiness};
