//! `PostgreSQL` implementation of [`OrderRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::error::OrderError;
use courier_core::event::EventType;
use courier_core::order::{Order, OrderId, OrderStatus, UserId};
use courier_core::repository::OrderRepository;
use courier_core::time_gap::TimeGap;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const MICROS_PER_DAY: i64 = 86_400_000_000;

const ORDER_COLUMNS: &str = "order_id, user_id, agent_id, order_address, order_location, \
     order_date, order_time_gap, order_status, created_at, updated_at";

/// Order store backed by the `orders` table.
///
/// The one-active-order rule is enforced by the partial unique index
/// `orders_one_active_per_user`; a violation surfaces as
/// [`OrderError::Conflict`]. When the outbox is enabled every write also
/// appends an `order_outbox` row in the same transaction.
///
/// # Example
///
/// ```no_run
/// use courier_postgres::PostgresOrderStore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresOrderStore::from_pool(pool).with_outbox(true);
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    outbox: bool,
}

impl PostgresOrderStore {
    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Persistence`] if the database is unreachable.
    pub async fn connect(
        options: PgConnectOptions,
        max_connections: u32,
    ) -> Result<Self, OrderError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(persistence)?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool. The outbox starts disabled.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            outbox: false,
        }
    }

    /// Record outbox rows alongside every write.
    #[must_use]
    pub const fn with_outbox(mut self, enabled: bool) -> Self {
        self.outbox = enabled;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Persistence`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), OrderError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrderError::Persistence(format!("migration failed: {e}")))
    }

    /// Round-trip a trivial query for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Persistence`] if the database does not answer.
    pub async fn ping(&self) -> Result<(), OrderError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(persistence)
    }

    /// Outbox rows not yet published, including rows that ran out of
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Persistence`] if the query fails.
    pub async fn outbox_backlog(&self) -> Result<i64, OrderError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM order_outbox WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(persistence)?;
        Ok(count)
    }

    async fn enqueue(
        tx: &mut Transaction<'_, Postgres>,
        event_type: EventType,
        order: &Order,
    ) -> Result<(), OrderError> {
        let payload = serde_json::to_value(order)
            .map_err(|e| OrderError::Persistence(format!("outbox payload: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO order_outbox (order_id, routing_key, payload)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(order.order_id.as_uuid())
        .bind(event_type.routing_key())
        .bind(payload)
        .execute(&mut **tx)
        .await
        .map_err(persistence)?;

        tracing::debug!(
            order_id = %order.order_id,
            routing_key = %event_type,
            "Outbox row recorded"
        );
        Ok(())
    }

    async fn current_status(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<Option<OrderStatus>, OrderError> {
        let row = sqlx::query("SELECT order_status FROM orders WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(persistence)?;

        row.map(|row| {
            let status: String = row.try_get("order_status").map_err(persistence)?;
            status.parse()
        })
        .transpose()
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), OrderError> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let result = sqlx::query(
            r"
            INSERT INTO orders (
                order_id, user_id, agent_id, order_address, order_location,
                order_date, order_time_gap, order_status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(order.order_id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.agent_id.map(|id| id.as_uuid()))
        .bind(&order.address)
        .bind(&order.location)
        .bind(order.scheduled_date)
        .bind(to_interval(order.time_gap))
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if is_unique_violation(&e) {
                return Err(OrderError::active_order_exists(order.user_id));
            }
            return Err(persistence(e));
        }

        if self.outbox {
            Self::enqueue(&mut tx, EventType::Created, order).await?;
        }

        tx.commit().await.map_err(persistence)
    }

    async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>, OrderError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence)?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = $1 ORDER BY created_at DESC, order_id"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        rows.iter().map(row_to_order).collect()
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE order_status = $1 ORDER BY created_at ASC, order_id"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        rows.iter().map(row_to_order).collect()
    }

    async fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        let sources: Vec<&str> = OrderStatus::sources_of(to)
            .into_iter()
            .map(OrderStatus::as_str)
            .collect();
        let sql = format!(
            r"
            UPDATE orders
            SET order_status = $3, updated_at = $4
            WHERE order_id = $1 AND order_status = ANY($2)
            RETURNING {ORDER_COLUMNS}
            "
        );

        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .bind(sources)
            .bind(to.as_str())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(persistence)?;

        let Some(row) = row else {
            let current = Self::current_status(&mut tx, order_id).await?;
            tx.rollback().await.map_err(persistence)?;
            return Err(match current {
                None => OrderError::NotFound(order_id),
                Some(from) => OrderError::InvalidTransition { order_id, from, to },
            });
        };

        let order = row_to_order(&row)?;
        if self.outbox {
            if let Some(event_type) = EventType::for_transition(to) {
                Self::enqueue(&mut tx, event_type, &order).await?;
            }
        }
        tx.commit().await.map_err(persistence)?;
        Ok(order)
    }

    fn records_outbox(&self) -> bool {
        self.outbox
    }
}

fn persistence(e: sqlx::Error) -> OrderError {
    OrderError::Persistence(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn to_interval(gap: TimeGap) -> PgInterval {
    PgInterval {
        months: 0,
        days: 0,
        microseconds: gap.as_micros(),
    }
}

/// Months are taken as 30 days; the store never writes them.
fn from_interval(interval: &PgInterval) -> Result<TimeGap, OrderError> {
    let days = i64::from(interval.months) * 30 + i64::from(interval.days);
    let micros = days
        .checked_mul(MICROS_PER_DAY)
        .and_then(|d| d.checked_add(interval.microseconds))
        .ok_or_else(|| OrderError::Persistence("order_time_gap out of range".to_string()))?;
    TimeGap::from_micros(micros)
        .map_err(|e| OrderError::Persistence(format!("order_time_gap: {e}")))
}

fn row_to_order(row: &PgRow) -> Result<Order, OrderError> {
    let status: String = row.try_get("order_status").map_err(persistence)?;
    let agent_id: Option<Uuid> = row.try_get("agent_id").map_err(persistence)?;
    let interval: PgInterval = row.try_get("order_time_gap").map_err(persistence)?;

    Ok(Order {
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(persistence)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(persistence)?),
        agent_id: agent_id.map(UserId::from_uuid),
        address: row.try_get("order_address").map_err(persistence)?,
        location: row.try_get("order_location").map_err(persistence)?,
        scheduled_date: row.try_get("order_date").map_err(persistence)?,
        time_gap: from_interval(&interval)?,
        status: status
            .parse()
            .map_err(|e: OrderError| OrderError::Persistence(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(persistence)?,
        updated_at: row.try_get("updated_at").map_err(persistence)?,
    })
}
