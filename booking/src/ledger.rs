//! Capacity ledger: the authority on how many seats each event has left.
//!
//! Every mutation runs the [`CapacityReducer`] inside the store's per-event
//! lock, so reserve, release and resize on one event are linearizable while
//! different events proceed in parallel.

use crate::aggregates::{CapacityAction, CapacityEnvironment, CapacityReducer};
use crate::error::{BookingError, Result};
use crate::metrics::CapacityMetrics;
use crate::stores::CapacityStore;
use crate::types::{EventCapacity, EventId};
use booking_core::environment::Clock;
use booking_core::reducer::Reducer;
use std::sync::Arc;

/// Per-event seat counters
#[derive(Clone)]
pub struct CapacityLedger {
    store: Arc<dyn CapacityStore>,
    env: CapacityEnvironment,
}

impl CapacityLedger {
    /// Ledger over `store`, timestamped by `clock`
    #[must_use]
    pub fn new(store: Arc<dyn CapacityStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            env: CapacityEnvironment::new(clock),
        }
    }

    /// Open a ledger for a new event.
    ///
    /// # Errors
    ///
    /// `Validation` if the event already has a ledger.
    pub async fn create(&self, event_id: EventId, total: u32) -> Result<EventCapacity> {
        let capacity = EventCapacity::new(event_id, total, self.env.clock.now());
        self.store
            .insert(capacity.clone())
            .await
            .map_err(|err| match err {
                crate::error::StoreError::DuplicateKey(_) => {
                    BookingError::Validation(format!("Event {event_id} already has capacity"))
                }
                other => other.into(),
            })?;
        tracing::info!(event_id = %event_id, total, "Event capacity created");
        Ok(capacity)
    }

    /// Hold `quantity` seats, all or nothing.
    ///
    /// # Errors
    ///
    /// `InsufficientCapacity` when fewer seats are available, `Validation` for
    /// a zero quantity, `NotFound` for an unknown event.
    pub async fn reserve(&self, event_id: EventId, quantity: u32) -> Result<EventCapacity> {
        let result = self.apply(event_id, CapacityAction::Reserve { quantity }).await;
        match &result {
            Ok(capacity) => tracing::info!(
                event_id = %event_id,
                quantity,
                available = capacity.available,
                "Capacity reserved"
            ),
            Err(BookingError::InsufficientCapacity { available, .. }) => {
                CapacityMetrics::record_rejection();
                tracing::warn!(
                    event_id = %event_id,
                    quantity,
                    available,
                    "Reserve rejected: insufficient capacity"
                );
            }
            Err(_) => {}
        }
        result
    }

    /// Return up to `quantity` seats; never drives `reserved` below zero.
    ///
    /// # Errors
    ///
    /// `Validation` for a zero quantity, `NotFound` for an unknown event.
    pub async fn release(&self, event_id: EventId, quantity: u32) -> Result<EventCapacity> {
        let capacity = self.apply(event_id, CapacityAction::Release { quantity }).await?;
        tracing::info!(
            event_id = %event_id,
            quantity,
            available = capacity.available,
            "Capacity released"
        );
        Ok(capacity)
    }

    /// Change the event's total capacity.
    ///
    /// # Errors
    ///
    /// `Validation` when `total` is below the seats already reserved.
    pub async fn resize(&self, event_id: EventId, total: u32) -> Result<EventCapacity> {
        let capacity = self.apply(event_id, CapacityAction::Resize { total }).await?;
        tracing::info!(event_id = %event_id, total, "Capacity resized");
        Ok(capacity)
    }

    /// Point-in-time snapshot.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event.
    pub async fn get(&self, event_id: EventId) -> Result<EventCapacity> {
        self.store
            .get(event_id)
            .await?
            .ok_or_else(|| BookingError::not_found("event capacity", event_id))
    }

    /// Seats available right now. Advisory: the answer may be stale by the time
    /// the caller acts on it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event.
    pub async fn available(&self, event_id: EventId) -> Result<u32> {
        Ok(self.get(event_id).await?.available)
    }

    async fn apply(&self, event_id: EventId, action: CapacityAction) -> Result<EventCapacity> {
        let env = self.env.clone();
        self.store
            .update(
                event_id,
                Box::new(move |capacity: &mut EventCapacity| {
                    CapacityReducer::new().reduce(capacity, action, &env)?;
                    Ok(())
                }),
            )
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::stores::InMemoryCapacityStore;
    use booking_testing::test_clock;

    fn ledger() -> CapacityLedger {
        CapacityLedger::new(
            Arc::new(InMemoryCapacityStore::new()),
            Arc::new(test_clock()),
        )
    }

    #[tokio::test]
    async fn exact_fit_then_sold_out() {
        let ledger = ledger();
        let event = EventId::new(7);
        ledger.create(event, 3).await.unwrap();

        ledger.reserve(event, 3).await.unwrap();
        let err = ledger.reserve(event, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientCapacity);
        assert_eq!(ledger.available(event).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_clamps_at_zero() {
        let ledger = ledger();
        let event = EventId::new(7);
        ledger.create(event, 10).await.unwrap();
        ledger.reserve(event, 2).await.unwrap();

        let capacity = ledger.release(event, 5).await.unwrap();
        assert_eq!(capacity.reserved, 0);
        assert_eq!(capacity.available, 10);
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let ledger = ledger();
        let err = ledger.reserve(EventId::new(99), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            ledger.get(EventId::new(99)).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn create_twice_is_validation() {
        let ledger = ledger();
        ledger.create(EventId::new(1), 5).await.unwrap();
        let err = ledger.create(EventId::new(1), 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn resize_respects_reserved() {
        let ledger = ledger();
        let event = EventId::new(1);
        ledger.create(event, 10).await.unwrap();
        ledger.reserve(event, 6).await.unwrap();

        assert_eq!(
            ledger.resize(event, 5).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        let capacity = ledger.resize(event, 20).await.unwrap();
        assert_eq!(capacity.available, 14);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reserves_never_oversell() {
        let ledger = ledger();
        let event = EventId::new(1);
        ledger.create(event, 50).await.unwrap();

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.reserve(event, 1).await.is_ok() })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 50);
        let capacity = ledger.get(event).await.unwrap();
        assert!(capacity.is_consistent());
        assert_eq!(capacity.available, 0);
    }
}
