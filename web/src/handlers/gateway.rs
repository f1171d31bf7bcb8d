//! Authenticated WebSocket endpoint (`GET /ws`).
//!
//! # Handshake
//!
//! ```text
//! Origin not allowed            -> 403
//! no / empty Bearer token       -> 400   (auth service not called)
//! token rejected or unreachable -> 401   (body carries the reason)
//! not an upgrade request        -> 400
//! otherwise                     -> 101, session registered
//! ```
//!
//! # Session
//!
//! One task per socket. It drains the session's outbound channel onto the
//! socket, sends a Ping every `ping_interval`, and reads inbound frames only
//! to notice the peer going away. A zero `ping_interval` disables pings.
//! The session is deregistered when the peer closes, the socket errors, the
//! registry drops the handle, or the gateway shuts down.

use crate::error::AppError;
use crate::extractors::BearerToken;
use crate::registry::{ConnectionId, ConnectionRegistry, SessionHandle};
use crate::state::GatewayState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, header::ORIGIN},
    response::Response,
};
use courier_core::order::UserId;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Upgrade handler for `GET /ws`.
///
/// # Errors
///
/// See the module docs for the status of each rejected handshake.
pub async fn ws_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !state.origin_allowed(origin) {
        warn!(origin = ?origin, "WebSocket origin rejected");
        return Err(AppError::forbidden("origin not allowed"));
    }

    let token = BearerToken::from_headers(&headers)?;

    let identity = state
        .validator
        .validate_token(token.as_str())
        .await
        .map_err(|e| {
            debug!(error = %e, "WebSocket token rejected");
            AppError::unauthorized(e.to_string())
        })?;

    let upgrade = upgrade.map_err(|e| AppError::bad_request(e.body_text()))?;

    let user_id = identity.user_id;
    info!(user_id = %user_id, role = %identity.role, "WebSocket upgrade accepted");

    Ok(upgrade
        .on_failed_upgrade(move |e| {
            warn!(user_id = %user_id, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| run_session(socket, user_id, state)))
}

async fn run_session(socket: WebSocket, user_id: UserId, state: GatewayState) {
    let (handle, mut outbound) = SessionHandle::channel(state.outbound_capacity);
    let connection_id = handle.id();
    // Subscribe before registering so a shutdown fired in between is seen.
    let mut shutdown = state.shutdown.subscribe();
    let mut registration = Registration::new(state.registry.clone(), user_id, handle);

    let (mut sink, mut stream) = socket.split();
    let mut ping = keepalive(state.ping_interval);

    let reason = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break "peer closed",
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "WebSocket read failed");
                    break "read error";
                }
            },
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break "write error";
                    }
                }
                None => break "handle dropped",
            },
            () = next_ping(&mut ping) => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break "ping failed";
                }
            }
            _ = shutdown.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break "shutdown";
            }
        }
    };

    registration.reason = reason;
}

/// Ping timer; `None` when the interval is zero, which disables pings.
fn keepalive(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Keeps a session in the registry for as long as it lives.
///
/// Removal happens on drop, so a session task that unwinds or is aborted
/// still leaves the registry.
struct Registration {
    registry: ConnectionRegistry,
    user_id: UserId,
    connection_id: ConnectionId,
    reason: &'static str,
}

impl Registration {
    fn new(registry: ConnectionRegistry, user_id: UserId, handle: SessionHandle) -> Self {
        let connection_id = handle.id();
        registry.add(user_id, handle);
        info!(user_id = %user_id, connection_id = %connection_id, "Session registered");
        Self {
            registry,
            user_id,
            connection_id,
            reason: "aborted",
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.user_id, self.connection_id);
        info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            reason = self.reason,
            "Session closed"
        );
    }
}
