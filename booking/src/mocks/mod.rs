//! Scriptable doubles for tests, built with the `test-utils` feature.
//!
//! These wrap or replace the real collaborators so tests can inject the
//! failures the engines must survive: a processor that declines, times out or
//! stalls mid-charge, an event service that goes away, a reservation store
//! that loses an insert or an idempotency race.

pub mod events;
pub mod processor;
pub mod reservations;

pub use events::{EventCall, FlakyEventCapability};
pub use processor::ScriptedProcessor;
pub use reservations::{FailingReservationStore, FlakyReservationCapability};
