//! Outbound capabilities: what each engine needs from the other services.
//!
//! The reservation engine talks to the event side through [`EventCapability`];
//! the payment engine talks to the reservation side through
//! [`ReservationCapability`]. Both come in an in-process flavour
//! ([`local`]) and an HTTP flavour ([`http`]).
//!
//! A capability reports an unreachable or ambiguous collaborator as
//! [`BookingError::Unavailable`](crate::error::BookingError::Unavailable) and
//! never invents an answer.

use crate::error::Result;
use crate::types::{EventId, EventInfo, Reservation, ReservationId};
use async_trait::async_trait;

pub mod http;
pub mod local;

pub use http::{HttpEventCapability, HttpReservationCapability};
pub use local::{LocalEventCapability, LocalReservationCapability};

/// Event catalog and capacity, as seen by the reservation engine
#[async_trait]
pub trait EventCapability: Send + Sync {
    /// Status and price of an event.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Unavailable` when unreachable.
    async fn get_event(&self, event_id: EventId) -> Result<EventInfo>;

    /// Seats available now. Advisory only.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Unavailable` when unreachable.
    async fn get_availability(&self, event_id: EventId) -> Result<u32>;

    /// Hold seats, all or nothing.
    ///
    /// # Errors
    ///
    /// `InsufficientCapacity` when sold out, `Unavailable` when the outcome is
    /// unknown.
    async fn reserve(&self, event_id: EventId, quantity: u32) -> Result<()>;

    /// Return seats.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event, `Unavailable` when unreachable.
    async fn release(&self, event_id: EventId, quantity: u32) -> Result<()>;
}

/// Reservation lifecycle, as seen by the payment engine
#[async_trait]
pub trait ReservationCapability: Send + Sync {
    /// Current reservation.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown reservation, `Unavailable` when unreachable.
    async fn get_reservation(&self, id: &ReservationId) -> Result<Reservation>;

    /// Mark a PENDING reservation as paid.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless PENDING, `Unavailable` when unreachable.
    async fn confirm_reservation(&self, id: &ReservationId) -> Result<Reservation>;

    /// Cancel a reservation and release its seats.
    ///
    /// # Errors
    ///
    /// `InvalidState` when already terminal, `Unavailable` when unreachable.
    async fn cancel_reservation(&self, id: &ReservationId) -> Result<Reservation>;
}
