//! Transactional outbox relay.
//!
//! Rows written by [`PostgresOrderStore`](crate::PostgresOrderStore) with the
//! outbox enabled are picked up here and published in insertion order. The
//! batch is claimed with `FOR UPDATE SKIP LOCKED`, so several relays can run
//! against one database without publishing a row twice concurrently.

use courier_core::error::OrderError;
use courier_core::event_bus::{EventBus, Message};
use courier_core::topology::ORDER_EVENTS_EXCHANGE;
use courier_runtime::metrics::OUTBOX_RELAYED;
use courier_runtime::retry::RetryPolicy;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Result of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Rows published and marked.
    pub published: usize,
    /// Whether the pass stopped on a publish failure.
    pub failed: bool,
}

/// Background publisher for `order_outbox` rows.
pub struct OutboxRelay {
    pool: PgPool,
    event_bus: Arc<dyn EventBus>,
    batch_size: i64,
    max_attempts: i32,
    poll_interval: Duration,
    retry: RetryPolicy,
    shutdown: broadcast::Receiver<()>,
}

impl OutboxRelay {
    /// Create a relay with a 500ms poll interval, batches of 100 and at most
    /// 10 attempts per row.
    #[must_use]
    pub fn new(
        pool: PgPool,
        event_bus: Arc<dyn EventBus>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            pool,
            event_bus,
            batch_size: 100,
            max_attempts: 10,
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .jitter(0.2)
                .build(),
            shutdown,
        }
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set rows claimed per pass.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Rows that failed this many times are left for operators.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Spawn the relay as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Poll until shutdown.
    pub async fn run(&mut self) {
        info!(
            batch_size = self.batch_size,
            max_attempts = self.max_attempts,
            "Outbox relay started"
        );
        let mut failures = 0usize;

        loop {
            let delay = match self.relay_once().await {
                Ok(outcome) if outcome.failed => {
                    failures += 1;
                    self.retry.delay_for_attempt(failures - 1)
                }
                Ok(outcome) => {
                    failures = 0;
                    if outcome.published > 0 {
                        // More rows may be waiting.
                        continue;
                    }
                    self.poll_interval
                }
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "Outbox relay pass failed");
                    self.retry.delay_for_attempt(failures - 1)
                }
            };

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("Outbox relay stopped");
    }

    /// Claim and publish one batch.
    ///
    /// Rows are published in id order; the pass stops at the first publish
    /// failure so later rows for the same order are not sent ahead of it.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Persistence`] if the database fails.
    pub async fn relay_once(&self) -> Result<RelayOutcome, OrderError> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let rows = sqlx::query(
            r"
            SELECT id, routing_key, payload
            FROM order_outbox
            WHERE published_at IS NULL AND attempts < $1
            ORDER BY id
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(self.max_attempts)
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await
        .map_err(persistence)?;

        let mut outcome = RelayOutcome::default();
        for row in &rows {
            let id: i64 = row.try_get("id").map_err(persistence)?;
            let routing_key: String = row.try_get("routing_key").map_err(persistence)?;
            let payload: serde_json::Value = row.try_get("payload").map_err(persistence)?;
            let body = serde_json::to_vec(&payload)
                .map_err(|e| OrderError::Persistence(format!("outbox payload {id}: {e}")))?;

            let message = Message::json(routing_key.clone(), body);
            match self.event_bus.publish(ORDER_EVENTS_EXCHANGE, &message).await {
                Ok(()) => {
                    sqlx::query(
                        r"
                        UPDATE order_outbox
                        SET published_at = now(), attempts = attempts + 1, last_error = NULL
                        WHERE id = $1
                        ",
                    )
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(persistence)?;

                    outcome.published += 1;
                    metrics::counter!(OUTBOX_RELAYED).increment(1);
                    metrics::counter!(
                        courier_runtime::metrics::EVENTS_PUBLISHED,
                        "routing_key" => routing_key.clone()
                    )
                    .increment(1);
                    debug!(outbox_id = id, routing_key = %routing_key, "Outbox row published");
                }
                Err(e) => {
                    sqlx::query(
                        r"
                        UPDATE order_outbox
                        SET attempts = attempts + 1, last_error = $2
                        WHERE id = $1
                        ",
                    )
                    .bind(id)
                    .bind(e.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(persistence)?;

                    metrics::counter!(courier_runtime::metrics::EVENTS_PUBLISH_FAILED).increment(1);
                    warn!(
                        outbox_id = id,
                        routing_key = %routing_key,
                        error = %e,
                        "Outbox publish failed"
                    );
                    outcome.failed = true;
                    break;
                }
            }
        }

        tx.commit().await.map_err(persistence)?;
        Ok(outcome)
    }
}

fn persistence(e: sqlx::Error) -> OrderError {
    OrderError::Persistence(e.to_string())
}
