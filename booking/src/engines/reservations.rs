//! Reservation engine.
//!
//! # Create flow
//!
//! ```text
//! idempotency lookup ─▶ quota pre-check ─▶ GetEvent ─▶ advisory availability
//!        │                                                     │
//!        └── replay existing row                               ▼
//!                           reducer builds row ─▶ Reserve ─▶ insert (quota + key)
//!                                                   │            │
//!                                                   └─ Release ◀─┘ on failure
//! ```
//!
//! `Reserve` is the only capacity check that counts; everything before it is
//! there to fail fast. Once seats are held, a [`CompensationPlan`] guarantees
//! they are returned if the row cannot be written.

use crate::aggregates::{
    ReservationAction, ReservationEnvironment, ReservationReducer, ReservationState,
};
use crate::capabilities::EventCapability;
use crate::config::{DegradedMode, ReservationConfig};
use crate::error::{BookingError, Result, StoreError};
use crate::metrics::{CompensationMetrics, DegradedMetrics, ReservationMetrics};
use crate::stores::ReservationStore;
use crate::types::{
    EventId, ItemRequest, Money, Reservation, ReservationId, ReservationStatus, UserId,
};
use booking_core::environment::Clock;
use booking_core::idempotency::IdempotencyKey;
use booking_core::reducer::Reducer;
use booking_core::saga::CompensationPlan;
use std::sync::Arc;

/// Input to [`ReservationEngine::create`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateReservationRequest {
    /// Customer
    pub user_id: UserId,
    /// Event
    pub event_id: EventId,
    /// Tickets
    pub quantity: u32,
    /// Client idempotency key
    pub idempotency_key: Option<String>,
    /// Optional itemisation
    pub items: Vec<ItemRequest>,
}

impl CreateReservationRequest {
    /// Un-itemised request without a key
    #[must_use]
    pub const fn new(user_id: UserId, event_id: EventId, quantity: u32) -> Self {
        Self {
            user_id,
            event_id,
            quantity,
            idempotency_key: None,
            items: Vec::new(),
        }
    }

    /// Attach an idempotency key
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attach line items
    #[must_use]
    pub fn with_items(mut self, items: Vec<ItemRequest>) -> Self {
        self.items = items;
        self
    }
}

/// Creates reservations and owns their status
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    events: Arc<dyn EventCapability>,
    env: ReservationEnvironment,
    degraded_mode: DegradedMode,
}

impl ReservationEngine {
    /// Engine over `store`, reserving through `events`
    #[must_use]
    pub fn new(
        config: &ReservationConfig,
        store: Arc<dyn ReservationStore>,
        events: Arc<dyn EventCapability>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            events,
            env: ReservationEnvironment::new(clock, config.max_tickets_per_user_per_event),
            degraded_mode: config.degraded_mode,
        }
    }

    /// Create a PENDING reservation holding `quantity` seats.
    ///
    /// Repeating a call with the same idempotency key returns the first
    /// reservation unchanged.
    ///
    /// # Errors
    ///
    /// - `Validation` / `QuotaExceeded` for bad input or an exhausted quota
    /// - `NotFound` for an unknown event, `InvalidState` if it is not published
    /// - `InsufficientCapacity` when sold out
    /// - `Unavailable` when the event side cannot be reached
    pub async fn create(&self, request: CreateReservationRequest) -> Result<Reservation> {
        let result = self.create_inner(request).await;
        if let Err(err) = &result {
            ReservationMetrics::record_outcome(err.label());
        }
        result
    }

    async fn create_inner(&self, request: CreateReservationRequest) -> Result<Reservation> {
        let CreateReservationRequest {
            user_id,
            event_id,
            quantity,
            idempotency_key,
            items,
        } = request;
        let max = self.env.max_tickets_per_user_per_event;

        let idempotency_key = idempotency_key
            .map(IdempotencyKey::parse)
            .transpose()
            .map_err(|e| BookingError::Validation(e.to_string()))?;

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(key.as_str()).await? {
                tracing::info!(
                    reservation_id = %existing.id,
                    idempotency_key = %key,
                    "Returning existing reservation for idempotency key"
                );
                ReservationMetrics::record_outcome("replayed");
                return Ok(existing);
            }
        }

        let held = self.store.active_quantity(user_id, event_id).await?;
        ReservationReducer::validate_quota(held, quantity, max)?;

        let unit_price = self.unit_price(event_id).await?;
        self.check_availability(event_id, quantity).await?;

        let mut state = ReservationState::new(held);
        ReservationReducer::new().reduce(
            &mut state,
            ReservationAction::Create {
                reservation_id: ReservationId::new(),
                user_id,
                event_id,
                quantity,
                unit_price,
                items,
                idempotency_key: idempotency_key.map(String::from),
            },
            &self.env,
        )?;
        let reservation = state
            .reservation
            .ok_or_else(|| BookingError::Internal("Reducer produced no reservation".to_string()))?;

        self.events.reserve(event_id, quantity).await?;

        let mut plan = CompensationPlan::<BookingError>::new("create_reservation");
        let events = Arc::clone(&self.events);
        plan.register("release_capacity", move || async move {
            events.release(event_id, quantity).await
        });

        match self.store.insert(reservation.clone(), max).await {
            Ok(()) => {
                plan.complete();
                ReservationMetrics::record_outcome("created");
                tracing::info!(
                    reservation_id = %reservation.id,
                    user_id = %user_id,
                    event_id = %event_id,
                    quantity,
                    total_price = %reservation.total_price,
                    "Reservation created"
                );
                Ok(reservation)
            }
            Err(err) => {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    event_id = %event_id,
                    error = %err,
                    "Reservation insert failed, releasing capacity"
                );
                let report = plan.compensate().await;
                CompensationMetrics::record(
                    "create_reservation",
                    if report.is_clean() { "completed" } else { "failed" },
                );
                self.after_failed_insert(err, reservation.idempotency_key.as_deref())
                    .await
            }
        }
    }

    /// Resolve an insert failure once capacity has been given back
    async fn after_failed_insert(
        &self,
        err: StoreError,
        key: Option<&str>,
    ) -> Result<Reservation> {
        match (err, key) {
            (StoreError::DuplicateKey(_), Some(key)) => {
                let winner = self.store.find_by_idempotency_key(key).await?.ok_or_else(|| {
                    BookingError::Internal(format!(
                        "Idempotency key {key} conflicted but no reservation carries it"
                    ))
                })?;
                tracing::info!(
                    reservation_id = %winner.id,
                    idempotency_key = key,
                    "Lost idempotency race, returning winner"
                );
                ReservationMetrics::record_outcome("replayed");
                Ok(winner)
            }
            (err, _) => Err(err.into()),
        }
    }

    /// Catalog price, or the configured default when the catalog is down
    async fn unit_price(&self, event_id: EventId) -> Result<Money> {
        match self.events.get_event(event_id).await {
            Ok(info) if info.status.is_bookable() => Ok(info.unit_price),
            Ok(info) => Err(BookingError::InvalidState(format!(
                "Event {event_id} is {:?} and not open for booking",
                info.status
            ))),
            Err(err) if err.is_retryable() => match self.degraded_mode {
                DegradedMode::CatalogDefaults { unit_price } => {
                    tracing::warn!(
                        event_id = %event_id,
                        error = %err,
                        unit_price = %unit_price,
                        "Event catalog unavailable, using configured default price"
                    );
                    DegradedMetrics::record_fallback("get_event");
                    Ok(unit_price)
                }
                DegradedMode::Strict => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Advisory pre-check; a stale or missing answer never blocks `Reserve`
    async fn check_availability(&self, event_id: EventId, quantity: u32) -> Result<()> {
        match self.events.get_availability(event_id).await {
            Ok(available) if available < quantity => {
                tracing::warn!(
                    event_id = %event_id,
                    quantity,
                    available,
                    "Not enough seats according to availability check"
                );
                Err(BookingError::InsufficientCapacity {
                    event_id: event_id.get(),
                    requested: quantity,
                    available,
                })
            }
            Ok(_) => Ok(()),
            Err(err) if err.is_retryable() => {
                tracing::warn!(
                    event_id = %event_id,
                    error = %err,
                    "Availability check skipped"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Mark a PENDING reservation as paid.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidState` unless the reservation is PENDING.
    pub async fn confirm(&self, id: &ReservationId) -> Result<Reservation> {
        let reservation = self.apply(id, ReservationAction::Confirm).await?;
        tracing::info!(reservation_id = %id, "Reservation confirmed");
        Ok(reservation)
    }

    /// Cancel an active reservation and return its seats.
    ///
    /// The status change is committed first; two concurrent cancels cannot
    /// both get past it, so seats are released once.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidState` for a reservation that is already
    /// CANCELLED or EXPIRED.
    pub async fn cancel(&self, id: &ReservationId) -> Result<Reservation> {
        let reservation = self.apply(id, ReservationAction::Cancel).await?;
        tracing::info!(
            reservation_id = %id,
            quantity = reservation.quantity,
            "Reservation cancelled"
        );
        self.release_best_effort(&reservation, "cancel_reservation").await;
        Ok(reservation)
    }

    /// Expire a PENDING reservation and return its seats.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidState` unless the reservation is PENDING.
    pub async fn expire(&self, id: &ReservationId) -> Result<Reservation> {
        let reservation = self.apply(id, ReservationAction::Expire).await?;
        tracing::info!(
            reservation_id = %id,
            quantity = reservation.quantity,
            "Reservation expired"
        );
        self.release_best_effort(&reservation, "expire_reservation").await;
        Ok(reservation)
    }

    /// Look up a reservation.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn get(&self, id: &ReservationId) -> Result<Reservation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BookingError::not_found("reservation", id))
    }

    /// A user's reservations, newest first.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>> {
        Ok(self.store.list_by_user(user_id).await?)
    }

    /// Reservations in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn list_by_status(&self, status: ReservationStatus) -> Result<Vec<Reservation>> {
        Ok(self.store.list_by_status(status).await?)
    }

    async fn apply(&self, id: &ReservationId, action: ReservationAction) -> Result<Reservation> {
        let env = self.env.clone();
        self.store
            .update(
                id,
                Box::new(move |reservation: &mut Reservation| {
                    let mut state = ReservationState::existing(reservation.clone());
                    ReservationReducer::new().reduce(&mut state, action, &env)?;
                    if let Some(updated) = state.reservation {
                        *reservation = updated;
                    }
                    Ok(())
                }),
            )
            .await
    }

    async fn release_best_effort(&self, reservation: &Reservation, workflow: &'static str) {
        if let Err(err) = self
            .events
            .release(reservation.event_id, reservation.quantity)
            .await
        {
            CompensationMetrics::record(workflow, "release_failed");
            tracing::error!(
                reservation_id = %reservation.id,
                event_id = %reservation.event_id,
                quantity = reservation.quantity,
                error = %err,
                "Failed to release capacity"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capabilities::LocalEventCapability;
    use crate::catalog::InMemoryEventCatalog;
    use crate::error::ErrorKind;
    use crate::ledger::CapacityLedger;
    use crate::stores::{InMemoryCapacityStore, InMemoryReservationStore};
    use crate::types::EventStatus;
    use booking_testing::test_clock;

    struct Fixture {
        engine: ReservationEngine,
        ledger: CapacityLedger,
        catalog: Arc<InMemoryEventCatalog>,
    }

    async fn fixture(capacity: u32) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let ledger =
            CapacityLedger::new(Arc::new(InMemoryCapacityStore::new()), Arc::clone(&clock));
        let catalog = Arc::new(InMemoryEventCatalog::new());
        catalog
            .upsert(EventId::new(5), EventStatus::Published, Money::from_cents(2500))
            .await;
        ledger.create(EventId::new(5), capacity).await.unwrap();

        let events = Arc::new(LocalEventCapability::new(Arc::clone(&catalog), ledger.clone()));
        let engine = ReservationEngine::new(
            &ReservationConfig::default(),
            Arc::new(InMemoryReservationStore::new()),
            events,
            clock,
        );
        Fixture {
            engine,
            ledger,
            catalog,
        }
    }

    #[tokio::test]
    async fn create_prices_from_catalog_and_holds_seats() {
        let f = fixture(10).await;
        let reservation = f
            .engine
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), 2))
            .await
            .unwrap();

        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert_eq!(reservation.total_price, Money::from_cents(5000));
        assert_eq!(reservation.items.len(), 1);
        assert!(reservation.id.as_str().starts_with("RES-"));
        assert_eq!(f.ledger.available(EventId::new(5)).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn same_key_returns_same_reservation() {
        let f = fixture(10).await;
        let request = CreateReservationRequest::new(UserId::new(1), EventId::new(5), 2)
            .with_idempotency_key("k-1");

        let first = f.engine.create(request.clone()).await.unwrap();
        let second = f.engine.create(request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.ledger.available(EventId::new(5)).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn quota_spans_reservations() {
        let f = fixture(10).await;
        f.engine
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), 3))
            .await
            .unwrap();

        let err = f
            .engine
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), 2))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::QuotaExceeded { held: 3, .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.ledger.available(EventId::new(5)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn unpublished_event_rejected_without_reserving() {
        let f = fixture(10).await;
        f.catalog.set_status(EventId::new(5), EventStatus::Draft).await;

        let err = f
            .engine
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(f.ledger.available(EventId::new(5)).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn bad_items_rejected_before_reserving() {
        let f = fixture(10).await;
        let request = CreateReservationRequest::new(UserId::new(1), EventId::new(5), 3)
            .with_items(vec![ItemRequest {
                ticket_type: "VIP".to_string(),
                quantity: 1,
            }]);

        let err = f.engine.create(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.ledger.available(EventId::new(5)).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn cancel_releases_once() {
        let f = fixture(10).await;
        let reservation = f
            .engine
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), 4))
            .await
            .unwrap();

        f.engine.cancel(&reservation.id).await.unwrap();
        let err = f.engine.cancel(&reservation.id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(f.ledger.available(EventId::new(5)).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn confirm_only_from_pending() {
        let f = fixture(10).await;
        let reservation = f
            .engine
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), 1))
            .await
            .unwrap();

        let confirmed = f.engine.confirm(&reservation.id).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
        assert_eq!(
            f.engine.confirm(&reservation.id).await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            f.engine.expire(&reservation.id).await.unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[tokio::test]
    async fn expire_releases_pending() {
        let f = fixture(10).await;
        let reservation = f
            .engine
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), 2))
            .await
            .unwrap();

        let expired = f.engine.expire(&reservation.id).await.unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert_eq!(f.ledger.available(EventId::new(5)).await.unwrap(), 10);
        assert_eq!(
            f.engine
                .list_by_status(ReservationStatus::Expired)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_reservation_is_not_found() {
        let f = fixture(10).await;
        let id = ReservationId::new();
        assert_eq!(f.engine.get(&id).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(f.engine.cancel(&id).await.unwrap_err().kind(), ErrorKind::NotFound);
    }
}
