//! In-process capability adapters.

use super::{EventCapability, ReservationCapability};
use crate::catalog::InMemoryEventCatalog;
use crate::engines::ReservationEngine;
use crate::error::{BookingError, Result};
use crate::ledger::CapacityLedger;
use crate::types::{EventId, EventInfo, Reservation, ReservationId};
use async_trait::async_trait;
use std::sync::Arc;

/// [`EventCapability`] backed by an in-process catalog and ledger
#[derive(Clone)]
pub struct LocalEventCapability {
    catalog: Arc<InMemoryEventCatalog>,
    ledger: CapacityLedger,
}

impl LocalEventCapability {
    /// Adapter over `catalog` and `ledger`
    #[must_use]
    pub const fn new(catalog: Arc<InMemoryEventCatalog>, ledger: CapacityLedger) -> Self {
        Self { catalog, ledger }
    }
}

#[async_trait]
impl EventCapability for LocalEventCapability {
    async fn get_event(&self, event_id: EventId) -> Result<EventInfo> {
        self.catalog
            .get(event_id)
            .await
            .ok_or_else(|| BookingError::not_found("event", event_id))
    }

    async fn get_availability(&self, event_id: EventId) -> Result<u32> {
        self.ledger.available(event_id).await
    }

    async fn reserve(&self, event_id: EventId, quantity: u32) -> Result<()> {
        self.ledger.reserve(event_id, quantity).await.map(|_| ())
    }

    async fn release(&self, event_id: EventId, quantity: u32) -> Result<()> {
        self.ledger.release(event_id, quantity).await.map(|_| ())
    }
}

/// [`ReservationCapability`] backed by an in-process reservation engine
#[derive(Clone)]
pub struct LocalReservationCapability {
    engine: Arc<ReservationEngine>,
}

impl LocalReservationCapability {
    /// Adapter over `engine`
    #[must_use]
    pub const fn new(engine: Arc<ReservationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ReservationCapability for LocalReservationCapability {
    async fn get_reservation(&self, id: &ReservationId) -> Result<Reservation> {
        self.engine.get(id).await
    }

    async fn confirm_reservation(&self, id: &ReservationId) -> Result<Reservation> {
        self.engine.confirm(id).await
    }

    async fn cancel_reservation(&self, id: &ReservationId) -> Result<Reservation> {
        self.engine.cancel(id).await
    }
}
