//! Reservation store and capability doubles.

use crate::capabilities::ReservationCapability;
use crate::error::{self, BookingError, StoreError};
use crate::stores::{InMemoryReservationStore, Mutation, ReservationStore};
use crate::types::{EventId, Reservation, ReservationId, ReservationStatus, UserId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory reservation store with injectable faults.
///
/// - [`Self::fail_next_insert`] rejects the next insert with a given error.
/// - [`Self::hide_key_lookups`] makes idempotency-key lookups miss, which
///   reproduces two requests with the same key passing the lookup before
///   either has inserted.
#[derive(Debug, Default)]
pub struct FailingReservationStore {
    inner: InMemoryReservationStore,
    next_insert_error: Mutex<Option<StoreError>>,
    hidden_lookups: AtomicUsize,
}

impl FailingReservationStore {
    /// Store that behaves like [`InMemoryReservationStore`] until told otherwise
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next insert with `error`
    pub fn fail_next_insert(&self, error: StoreError) {
        *self
            .next_insert_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Make the next `count` idempotency-key lookups report no match
    pub fn hide_key_lookups(&self, count: usize) {
        self.hidden_lookups.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReservationStore for FailingReservationStore {
    async fn insert(&self, reservation: Reservation, max_active: u32) -> Result<(), StoreError> {
        let injected = self
            .next_insert_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = injected {
            return Err(error);
        }
        self.inner.insert(reservation, max_active).await
    }

    async fn get(&self, id: &ReservationId) -> Result<Option<Reservation>, StoreError> {
        self.inner.get(id).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Reservation>, StoreError> {
        let hidden = self
            .hidden_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(None);
        }
        self.inner.find_by_idempotency_key(key).await
    }

    async fn active_quantity(&self, user_id: UserId, event_id: EventId) -> Result<u32, StoreError> {
        self.inner.active_quantity(user_id, event_id).await
    }

    async fn update(
        &self,
        id: &ReservationId,
        mutation: Mutation<'_, Reservation>,
    ) -> Result<Reservation, BookingError> {
        self.inner.update(id, mutation).await
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>, StoreError> {
        self.inner.list_by_user(user_id).await
    }

    async fn list_by_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.inner.list_by_status(status).await
    }
}

/// Wraps a [`ReservationCapability`]; confirmations can be switched off.
pub struct FlakyReservationCapability {
    inner: Arc<dyn ReservationCapability>,
    fail_confirms: AtomicBool,
    confirm_calls: AtomicUsize,
}

impl FlakyReservationCapability {
    /// Pass-through wrapper around `inner`
    #[must_use]
    pub fn new(inner: Arc<dyn ReservationCapability>) -> Self {
        Self {
            inner,
            fail_confirms: AtomicBool::new(false),
            confirm_calls: AtomicUsize::new(0),
        }
    }

    /// Make `confirm_reservation` report `Unavailable` (or pass through again)
    pub fn fail_confirms(&self, failing: bool) {
        self.fail_confirms.store(failing, Ordering::SeqCst);
    }

    /// How often `confirm_reservation` was called
    #[must_use]
    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReservationCapability for FlakyReservationCapability {
    async fn get_reservation(&self, id: &ReservationId) -> error::Result<Reservation> {
        self.inner.get_reservation(id).await
    }

    async fn confirm_reservation(&self, id: &ReservationId) -> error::Result<Reservation> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_confirms.load(Ordering::SeqCst) {
            return Err(BookingError::Unavailable(
                "reservation service unavailable".to_string(),
            ));
        }
        self.inner.confirm_reservation(id).await
    }

    async fn cancel_reservation(&self, id: &ReservationId) -> error::Result<Reservation> {
        self.inner.cancel_reservation(id).await
    }
}
