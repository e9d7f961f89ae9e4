//! Engines that coordinate the aggregates with their stores and collaborators.

pub mod payments;
pub mod reservations;

pub use payments::{CreateIntentRequest, PaymentEngine};
pub use reservations::{CreateReservationRequest, ReservationEngine};
