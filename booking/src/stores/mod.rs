//! Storage contracts for capacity, reservations, and payments.
//!
//! Every backend gives the same guarantees:
//!
//! - `update` runs its mutation with exclusive access to one record (a per-record
//!   mutex in memory, `SELECT … FOR UPDATE` in Postgres) and persists the result
//!   only if the mutation returns `Ok`. Different records never block each other.
//! - Idempotency and capture keys are unique; a conflicting insert reports
//!   [`StoreError::DuplicateKey`] so the caller can read the winner's row.
//! - [`ReservationStore::insert`] checks the per-user quota atomically with the
//!   insert.

use crate::aggregates::PaymentState;
use crate::error::{BookingError, StoreError};
use crate::types::{
    EventCapacity, EventId, IntentId, Payment, PaymentId, PaymentIntent, Reservation,
    ReservationId, ReservationStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryCapacityStore, InMemoryPaymentStore, InMemoryReservationStore};

/// A change applied to a record while it is locked.
///
/// Returning `Err` aborts the update; nothing is written.
pub type Mutation<'a, S> = Box<dyn FnOnce(&mut S) -> Result<(), BookingError> + Send + 'a>;

/// Persistence for per-event seat counters
#[async_trait]
pub trait CapacityStore: Send + Sync {
    /// Create counters for a new event.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if the event already has counters.
    async fn insert(&self, capacity: EventCapacity) -> Result<(), StoreError>;

    /// Point-in-time snapshot.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn get(&self, event_id: EventId) -> Result<Option<EventCapacity>, StoreError>;

    /// Apply `mutation` under the event's exclusive lock.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, the mutation's own error, or a backend
    /// failure.
    async fn update(
        &self,
        event_id: EventId,
        mutation: Mutation<'_, EventCapacity>,
    ) -> Result<EventCapacity, BookingError>;
}

/// Persistence for reservations
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Insert a new reservation.
    ///
    /// Atomically with the insert, checks that the user's active tickets for the
    /// event plus this reservation stay within `max_active`.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] for a reused id or idempotency key,
    /// [`StoreError::QuotaExceeded`] when the quota would be exceeded.
    async fn insert(&self, reservation: Reservation, max_active: u32) -> Result<(), StoreError>;

    /// Look up by id.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn get(&self, id: &ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Look up by the client idempotency key.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Reservation>, StoreError>;

    /// Tickets held by `user_id` for `event_id` in PENDING or CONFIRMED reservations.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn active_quantity(&self, user_id: UserId, event_id: EventId) -> Result<u32, StoreError>;

    /// Apply `mutation` under the reservation's row lock.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, the mutation's own error, or a backend
    /// failure.
    async fn update(
        &self,
        id: &ReservationId,
        mutation: Mutation<'_, Reservation>,
    ) -> Result<Reservation, BookingError>;

    /// All reservations of a user, newest first.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>, StoreError>;

    /// All reservations in a status, oldest first.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn list_by_status(&self, status: ReservationStatus)
    -> Result<Vec<Reservation>, StoreError>;
}

/// Persistence for payment intents and payments
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new intent.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] for a reused id or idempotency key.
    async fn insert_intent(&self, intent: PaymentIntent) -> Result<(), StoreError>;

    /// Look up an intent by id.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>, StoreError>;

    /// Look up an intent by its idempotency key.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find_intent_by_key(&self, key: &str) -> Result<Option<PaymentIntent>, StoreError>;

    /// Apply `mutation` to an intent and its latest payment under the intent's
    /// row lock.
    ///
    /// A payment the mutation adds is inserted; an existing one is updated. A
    /// capture key already used by another payment aborts the update with
    /// `InvalidState`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown intent, the mutation's own error, or a backend
    /// failure.
    async fn update_intent(
        &self,
        id: &IntentId,
        mutation: Mutation<'_, PaymentState>,
    ) -> Result<PaymentState, BookingError>;

    /// Look up a payment by id.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn get_payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError>;

    /// Look up a payment by its capture-scoped key.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn find_payment_by_capture_key(&self, key: &str)
    -> Result<Option<Payment>, StoreError>;

    /// All intents of a user, newest first.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn list_intents_by_user(&self, user_id: UserId) -> Result<Vec<PaymentIntent>, StoreError>;

    /// All payments of a user, newest first.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn list_payments_by_user(&self, user_id: UserId) -> Result<Vec<Payment>, StoreError>;

    /// Ids of intents past `expires_at` at `now` whose status the sweep may
    /// cancel, oldest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn expired_intents(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IntentId>, StoreError>;

    /// Succeeded payments whose reservation has not been confirmed yet.
    ///
    /// # Errors
    ///
    /// Backend failures.
    async fn awaiting_confirmation(&self, limit: usize) -> Result<Vec<Payment>, StoreError>;
}
