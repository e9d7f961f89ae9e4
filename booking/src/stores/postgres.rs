//! `PostgreSQL` stores.
//!
//! Row locking maps directly onto the store contracts: `update` methods open a
//! transaction, `SELECT … FOR UPDATE` the row, run the mutation, write the row
//! back and commit. A mutation error drops the transaction, which rolls back.
//!
//! The per-user quota check on reservation insert is serialized per
//! `(user, event)` with a transaction-scoped advisory lock, so two concurrent
//! inserts for the same pair cannot both see the old total.
//!
//! # Example
//!
//! ```no_run
//! use booking::stores::postgres::{connect, migrate, PostgresCapacityStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/booking", 10).await?;
//! migrate(&pool).await?;
//! let capacity = PostgresCapacityStore::new(pool);
//! # Ok(())
//! # }
//! ```

use super::{CapacityStore, Mutation, PaymentStore, ReservationStore};
use crate::aggregates::PaymentState;
use crate::error::{BookingError, StoreError};
use crate::types::{
    ConfirmationStatus, Currency, EventCapacity, EventId, IntentId, IntentStatus, Money, Payment,
    PaymentId, PaymentIntent, PaymentStatus, Reservation, ReservationId, ReservationItem,
    ReservationStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] if the database cannot be reached.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))
}

/// Run the bundled schema migrations.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))
}

// ============================================================================
// Conversions
// ============================================================================

fn backend(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return StoreError::DuplicateKey(format!("{context}: {db_err}"));
            }
        }
        StoreError::Backend(format!("{context}: {e}"))
    }
}

fn to_db(value: u64, field: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{field} out of range: {value}")))
}

fn read_u64(row: &PgRow, column: &'static str) -> Result<u64, StoreError> {
    let raw: i64 = row.try_get(column).map_err(backend("Failed to decode row"))?;
    u64::try_from(raw).map_err(|_| StoreError::Backend(format!("Negative {column}: {raw}")))
}

fn read_u32(row: &PgRow, column: &'static str) -> Result<u32, StoreError> {
    let raw = read_u64(row, column)?;
    u32::try_from(raw).map_err(|_| StoreError::Backend(format!("{column} out of range: {raw}")))
}

fn read_str(row: &PgRow, column: &'static str) -> Result<String, StoreError> {
    row.try_get(column).map_err(backend("Failed to decode row"))
}

fn read_opt_str(row: &PgRow, column: &'static str) -> Result<Option<String>, StoreError> {
    row.try_get(column).map_err(backend("Failed to decode row"))
}

fn read_time(row: &PgRow, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    row.try_get(column).map_err(backend("Failed to decode row"))
}

fn parse_id<T>(raw: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::Backend(format!("Malformed id in database: {raw}")))
}

fn parse_enum<T>(raw: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::Backend(format!("Unknown status in database: {raw}")))
}

fn capacity_from_row(row: &PgRow) -> Result<EventCapacity, StoreError> {
    Ok(EventCapacity {
        event_id: EventId::new(read_u64(row, "event_id")?),
        total: read_u32(row, "total")?,
        reserved: read_u32(row, "reserved")?,
        available: read_u32(row, "available")?,
        updated_at: read_time(row, "updated_at")?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let items: Json<Vec<ReservationItem>> =
        row.try_get("items").map_err(backend("Failed to decode items"))?;
    Ok(Reservation {
        id: parse_id(&read_str(row, "id")?, ReservationId::parse)?,
        user_id: UserId::new(read_u64(row, "user_id")?),
        event_id: EventId::new(read_u64(row, "event_id")?),
        quantity: read_u32(row, "quantity")?,
        total_price: Money::from_cents(read_u64(row, "total_price")?),
        status: parse_enum(&read_str(row, "status")?, ReservationStatus::from_str_opt)?,
        idempotency_key: read_opt_str(row, "idempotency_key")?,
        items: items.0,
        created_at: read_time(row, "created_at")?,
        updated_at: read_time(row, "updated_at")?,
    })
}

fn currency_from(raw: &str) -> Result<Currency, StoreError> {
    Currency::parse(raw).ok_or_else(|| StoreError::Backend(format!("Bad currency: {raw}")))
}

fn intent_from_row(row: &PgRow) -> Result<PaymentIntent, StoreError> {
    Ok(PaymentIntent {
        id: parse_id(&read_str(row, "id")?, IntentId::parse)?,
        reservation_id: parse_id(&read_str(row, "reservation_id")?, ReservationId::parse)?,
        user_id: UserId::new(read_u64(row, "user_id")?),
        amount: Money::from_cents(read_u64(row, "amount")?),
        currency: currency_from(&read_str(row, "currency")?)?,
        status: parse_enum(&read_str(row, "status")?, IntentStatus::from_str_opt)?,
        idempotency_key: read_opt_str(row, "idempotency_key")?,
        payment_method: read_str(row, "payment_method")?,
        description: read_opt_str(row, "description")?,
        expires_at: read_time(row, "expires_at")?,
        created_at: read_time(row, "created_at")?,
        updated_at: read_time(row, "updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    Ok(Payment {
        id: parse_id(&read_str(row, "id")?, PaymentId::parse)?,
        intent_id: parse_id(&read_str(row, "intent_id")?, IntentId::parse)?,
        reservation_id: parse_id(&read_str(row, "reservation_id")?, ReservationId::parse)?,
        user_id: UserId::new(read_u64(row, "user_id")?),
        amount: Money::from_cents(read_u64(row, "amount")?),
        currency: currency_from(&read_str(row, "currency")?)?,
        status: parse_enum(&read_str(row, "status")?, PaymentStatus::from_str_opt)?,
        payment_method: read_str(row, "payment_method")?,
        capture_key: read_opt_str(row, "capture_key")?,
        provider_reference: read_opt_str(row, "provider_reference")?,
        failure_reason: read_opt_str(row, "failure_reason")?,
        captured_at: row
            .try_get("captured_at")
            .map_err(backend("Failed to decode row"))?,
        confirmation: parse_enum(
            &read_str(row, "confirmation")?,
            ConfirmationStatus::from_str_opt,
        )?,
        created_at: read_time(row, "created_at")?,
        updated_at: read_time(row, "updated_at")?,
    })
}

const RESERVATION_COLUMNS: &str = "id, user_id, event_id, quantity, total_price, status, \
     idempotency_key, items, created_at, updated_at";

const INTENT_COLUMNS: &str = "id, reservation_id, user_id, amount, currency, status, \
     idempotency_key, payment_method, description, expires_at, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, intent_id, reservation_id, user_id, amount, currency, \
     status, payment_method, capture_key, provider_reference, failure_reason, captured_at, \
     confirmation, created_at, updated_at";

#[allow(clippy::cast_possible_wrap)] // batch limits are small
const fn limit_param(limit: usize) -> i64 {
    limit as i64
}

// ============================================================================
// Capacity
// ============================================================================

/// `PostgreSQL` [`CapacityStore`]
#[derive(Clone)]
pub struct PostgresCapacityStore {
    pool: PgPool,
}

impl PostgresCapacityStore {
    /// Wrap a pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CapacityStore for PostgresCapacityStore {
    async fn insert(&self, capacity: EventCapacity) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO event_capacity (event_id, total, reserved, available, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(to_db(capacity.event_id.get(), "event_id")?)
        .bind(i64::from(capacity.total))
        .bind(i64::from(capacity.reserved))
        .bind(i64::from(capacity.available))
        .bind(capacity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to insert event capacity"))?;
        Ok(())
    }

    async fn get(&self, event_id: EventId) -> Result<Option<EventCapacity>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT event_id, total, reserved, available, updated_at
            FROM event_capacity
            WHERE event_id = $1
            ",
        )
        .bind(to_db(event_id.get(), "event_id")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to get event capacity"))?;
        row.as_ref().map(capacity_from_row).transpose()
    }

    async fn update(
        &self,
        event_id: EventId,
        mutation: Mutation<'_, EventCapacity>,
    ) -> Result<EventCapacity, BookingError> {
        let key = to_db(event_id.get(), "event_id")?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(backend("Failed to begin transaction"))?;

        let row = sqlx::query(
            r"
            SELECT event_id, total, reserved, available, updated_at
            FROM event_capacity
            WHERE event_id = $1
            FOR UPDATE
            ",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend("Failed to lock event capacity"))?
        .ok_or_else(|| BookingError::not_found("event capacity", event_id))?;

        let mut capacity = capacity_from_row(&row)?;
        mutation(&mut capacity)?;

        sqlx::query(
            r"
            UPDATE event_capacity
            SET total = $2, reserved = $3, available = $4, updated_at = $5
            WHERE event_id = $1
            ",
        )
        .bind(key)
        .bind(i64::from(capacity.total))
        .bind(i64::from(capacity.reserved))
        .bind(i64::from(capacity.available))
        .bind(capacity.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("Failed to update event capacity"))?;

        tx.commit()
            .await
            .map_err(backend("Failed to commit event capacity"))?;
        Ok(capacity)
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// `PostgreSQL` [`ReservationStore`]
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    /// Wrap a pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn held_in(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<u32, StoreError> {
        let held: i64 = sqlx::query_scalar(
            r"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM reservations
            WHERE user_id = $1 AND event_id = $2 AND status IN ('PENDING', 'CONFIRMED')
            ",
        )
        .bind(to_db(user_id.get(), "user_id")?)
        .bind(to_db(event_id.get(), "event_id")?)
        .fetch_one(&mut **tx)
        .await
        .map_err(backend("Failed to sum active reservations"))?;
        u32::try_from(held).map_err(|_| StoreError::Backend(format!("Bad active total: {held}")))
    }
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    async fn insert(&self, reservation: Reservation, max_active: u32) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(backend("Failed to begin transaction"))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{}:{}", reservation.user_id, reservation.event_id))
            .execute(&mut *tx)
            .await
            .map_err(backend("Failed to take quota lock"))?;

        let held = Self::held_in(&mut tx, reservation.user_id, reservation.event_id).await?;
        if held.saturating_add(reservation.quantity) > max_active {
            return Err(StoreError::QuotaExceeded {
                held,
                requested: reservation.quantity,
                max: max_active,
            });
        }

        sqlx::query(
            r"
            INSERT INTO reservations (
                id, user_id, event_id, quantity, total_price, status,
                idempotency_key, items, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(reservation.id.as_str())
        .bind(to_db(reservation.user_id.get(), "user_id")?)
        .bind(to_db(reservation.event_id.get(), "event_id")?)
        .bind(i64::from(reservation.quantity))
        .bind(to_db(reservation.total_price.cents(), "total_price")?)
        .bind(reservation.status.as_str())
        .bind(reservation.idempotency_key.as_deref())
        .bind(Json(&reservation.items))
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("Failed to insert reservation"))?;

        tx.commit()
            .await
            .map_err(backend("Failed to commit reservation"))
    }

    async fn get(&self, id: &ReservationId) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to get reservation"))?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to find reservation"))?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn active_quantity(&self, user_id: UserId, event_id: EventId) -> Result<u32, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(backend("Failed to begin transaction"))?;
        let held = Self::held_in(&mut tx, user_id, event_id).await?;
        tx.commit()
            .await
            .map_err(backend("Failed to commit transaction"))?;
        Ok(held)
    }

    async fn update(
        &self,
        id: &ReservationId,
        mutation: Mutation<'_, Reservation>,
    ) -> Result<Reservation, BookingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(backend("Failed to begin transaction"))?;

        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend("Failed to lock reservation"))?
        .ok_or_else(|| BookingError::not_found("reservation", id))?;

        let mut reservation = reservation_from_row(&row)?;
        mutation(&mut reservation)?;

        sqlx::query(
            r"
            UPDATE reservations
            SET status = $2, quantity = $3, total_price = $4, items = $5, updated_at = $6
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .bind(reservation.status.as_str())
        .bind(i64::from(reservation.quantity))
        .bind(to_db(reservation.total_price.cents(), "total_price")?)
        .bind(Json(&reservation.items))
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("Failed to update reservation"))?;

        tx.commit()
            .await
            .map_err(backend("Failed to commit reservation"))?;
        Ok(reservation)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(to_db(user_id.get(), "user_id")?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to list reservations"))?;
        rows.iter().map(reservation_from_row).collect()
    }

    async fn list_by_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to list reservations"))?;
        rows.iter().map(reservation_from_row).collect()
    }
}

// ============================================================================
// Payments
// ============================================================================

/// `PostgreSQL` [`PaymentStore`]
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Wrap a pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_payment(
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
    ) -> Result<(), BookingError> {
        sqlx::query(
            r"
            INSERT INTO payments (
                id, intent_id, reservation_id, user_id, amount, currency, status,
                payment_method, capture_key, provider_reference, failure_reason,
                captured_at, confirmation, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                provider_reference = EXCLUDED.provider_reference,
                failure_reason = EXCLUDED.failure_reason,
                captured_at = EXCLUDED.captured_at,
                confirmation = EXCLUDED.confirmation,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(payment.id.as_str())
        .bind(payment.intent_id.as_str())
        .bind(payment.reservation_id.as_str())
        .bind(to_db(payment.user_id.get(), "user_id")?)
        .bind(to_db(payment.amount.cents(), "amount")?)
        .bind(payment.currency.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.payment_method)
        .bind(payment.capture_key.as_deref())
        .bind(payment.provider_reference.as_deref())
        .bind(payment.failure_reason.as_deref())
        .bind(payment.captured_at)
        .bind(payment.confirmation.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| match backend("Failed to write payment")(e) {
            StoreError::DuplicateKey(msg) => BookingError::InvalidState(msg),
            other => other.into(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn insert_intent(&self, intent: PaymentIntent) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO payment_intents (
                id, reservation_id, user_id, amount, currency, status, idempotency_key,
                payment_method, description, expires_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(intent.id.as_str())
        .bind(intent.reservation_id.as_str())
        .bind(to_db(intent.user_id.get(), "user_id")?)
        .bind(to_db(intent.amount.cents(), "amount")?)
        .bind(intent.currency.as_str())
        .bind(intent.status.as_str())
        .bind(intent.idempotency_key.as_deref())
        .bind(&intent.payment_method)
        .bind(intent.description.as_deref())
        .bind(intent.expires_at)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to insert payment intent"))?;
        Ok(())
    }

    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to get payment intent"))?;
        row.as_ref().map(intent_from_row).transpose()
    }

    async fn find_intent_by_key(&self, key: &str) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to find payment intent"))?;
        row.as_ref().map(intent_from_row).transpose()
    }

    async fn update_intent(
        &self,
        id: &IntentId,
        mutation: Mutation<'_, PaymentState>,
    ) -> Result<PaymentState, BookingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(backend("Failed to begin transaction"))?;

        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend("Failed to lock payment intent"))?
        .ok_or_else(|| BookingError::not_found("payment intent", id))?;
        let intent = intent_from_row(&row)?;

        let payment = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE intent_id = $1 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend("Failed to load payment"))?
        .as_ref()
        .map(payment_from_row)
        .transpose()?;

        let mut state = PaymentState {
            intent: Some(intent),
            payment,
        };
        mutation(&mut state)?;

        let intent = state
            .intent
            .as_ref()
            .ok_or_else(|| BookingError::Internal("Mutation removed the intent".to_string()))?;
        sqlx::query(
            "UPDATE payment_intents SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(intent.status.as_str())
        .bind(intent.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend("Failed to update payment intent"))?;

        if let Some(payment) = &state.payment {
            Self::write_payment(&mut tx, payment).await?;
        }

        tx.commit()
            .await
            .map_err(backend("Failed to commit payment"))?;
        Ok(state)
    }

    async fn get_payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("Failed to get payment"))?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn find_payment_by_capture_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE capture_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("Failed to find payment"))?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_intents_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM payment_intents \
             WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(to_db(user_id.get(), "user_id")?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to list payment intents"))?;
        rows.iter().map(intent_from_row).collect()
    }

    async fn list_payments_by_user(&self, user_id: UserId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(to_db(user_id.get(), "user_id")?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to list payments"))?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn expired_intents(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IntentId>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r"
            SELECT id FROM payment_intents
            WHERE status NOT IN ('SUCCEEDED', 'CANCELED', 'PROCESSING')
              AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to find expired intents"))?;
        ids.iter()
            .map(|raw| parse_id(raw, IntentId::parse))
            .collect()
    }

    async fn awaiting_confirmation(&self, limit: usize) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status = 'SUCCEEDED' AND confirmation = 'PENDING' \
             ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to find unconfirmed payments"))?;
        rows.iter().map(payment_from_row).collect()
    }
}
