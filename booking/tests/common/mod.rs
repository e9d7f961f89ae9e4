//! Shared wiring for the integration tests.
//!
//! Everything runs in process: a ledger and catalog behind a
//! [`FlakyEventCapability`], a [`FailingReservationStore`], the reservation
//! engine behind a [`FlakyReservationCapability`], and a
//! [`ScriptedProcessor`]. Time is a [`ManualClock`].

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use booking::capabilities::{LocalEventCapability, LocalReservationCapability};
use booking::catalog::InMemoryEventCatalog;
use booking::mocks::{
    FailingReservationStore, FlakyEventCapability, FlakyReservationCapability, ScriptedProcessor,
};
use booking::stores::{InMemoryCapacityStore, InMemoryPaymentStore};
use booking::types::{EventId, EventStatus, Money, PaymentIntent, Reservation, UserId};
use booking::{
    CapacityLedger, Config, CreateIntentRequest, CreateReservationRequest, PaymentEngine,
    ReservationEngine,
};
use booking_core::environment::Clock;
use booking_testing::{ManualClock, test_clock};
use std::sync::Arc;

/// Event every harness books against
pub const EVENT: EventId = EventId::new(5);

/// Catalog price of one ticket
pub const PRICE: Money = Money::from_cents(2500);

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: CapacityLedger,
    pub catalog: Arc<InMemoryEventCatalog>,
    pub events: Arc<FlakyEventCapability>,
    pub reservation_store: Arc<FailingReservationStore>,
    pub reservations: Arc<ReservationEngine>,
    pub reservation_capability: Arc<FlakyReservationCapability>,
    pub processor: Arc<ScriptedProcessor>,
    pub payments: Arc<PaymentEngine>,
}

impl Harness {
    pub async fn new(capacity: u32) -> Self {
        Self::with_config(capacity, &Config::default()).await
    }

    pub async fn with_config(capacity: u32, config: &Config) -> Self {
        booking_testing::init_test_tracing();

        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let ledger = CapacityLedger::new(Arc::new(InMemoryCapacityStore::new()), clock.clone());
        ledger.create(EVENT, capacity).await.unwrap();

        let catalog = Arc::new(InMemoryEventCatalog::new());
        catalog.upsert(EVENT, EventStatus::Published, PRICE).await;

        let events = Arc::new(FlakyEventCapability::new(Arc::new(LocalEventCapability::new(
            Arc::clone(&catalog),
            ledger.clone(),
        ))));
        let reservation_store = Arc::new(FailingReservationStore::new());
        let reservations = Arc::new(ReservationEngine::new(
            &config.reservations,
            reservation_store.clone(),
            events.clone(),
            clock.clone(),
        ));

        let reservation_capability = Arc::new(FlakyReservationCapability::new(Arc::new(
            LocalReservationCapability::new(Arc::clone(&reservations)),
        )));
        let processor = Arc::new(ScriptedProcessor::new());
        let payments = Arc::new(PaymentEngine::new(
            &config.payments,
            Arc::new(InMemoryPaymentStore::new()),
            reservation_capability.clone(),
            processor.clone(),
            clock.clone(),
        ));

        Self {
            clock,
            ledger,
            catalog,
            events,
            reservation_store,
            reservations,
            reservation_capability,
            processor,
            payments,
        }
    }

    pub async fn available(&self) -> u32 {
        self.ledger.available(EVENT).await.unwrap()
    }

    pub async fn reserve(&self, user: u64, quantity: u32) -> Reservation {
        self.reservations
            .create(CreateReservationRequest::new(UserId::new(user), EVENT, quantity))
            .await
            .unwrap()
    }

    pub async fn intent_for(&self, reservation: &Reservation) -> PaymentIntent {
        self.payments
            .create_intent(CreateIntentRequest::new(
                reservation.id.clone(),
                reservation.user_id,
                reservation.total_price,
            ))
            .await
            .unwrap()
    }
}
