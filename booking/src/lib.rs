//! Event booking: capacity ledger, reservation engine and payment engine.
//!
//! Three records are owned by three different actors and change in three
//! different transactions: an event's seat counters, a customer's
//! reservation, and the payment that settles it. There is no transaction
//! spanning them. This crate keeps them consistent with:
//!
//! - **Exclusive per-record updates.** Every store runs a mutation under a
//!   lock scoped to one row, so concurrent reserves never oversell an event.
//! - **Idempotency keys.** Repeating a create or capture with the same key
//!   returns the first result instead of booking or charging twice.
//! - **Compensation.** A workflow that has committed a side effect and then
//!   fails undoes it (releasing seats, refunding a charge) before returning.
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────┐
//!   create/cancel ───▶ │ ReservationEngine  │ ── EventCapability ──▶ CapacityLedger
//!                      └────────────────────┘        (local / HTTP)      + catalog
//!                                ▲
//!                  ReservationCapability (local / HTTP)
//!                                │
//!                      ┌────────────────────┐
//!  intent/capture ───▶ │   PaymentEngine    │ ── PaymentProcessor
//!                      └────────────────────┘
//!                                ▲
//!                             Sweeper (expiry + confirmation reconciliation)
//! ```
//!
//! Business rules live in the reducers under [`aggregates`]; the engines
//! load rows, run a reducer inside the store's locked update, and talk to
//! the collaborators.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod engines;
pub mod error;
pub mod ledger;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;
pub mod processor;
pub mod stores;
pub mod sweeper;
pub mod types;

pub use config::Config;
pub use engines::{CreateIntentRequest, CreateReservationRequest, PaymentEngine, ReservationEngine};
pub use error::{BookingError, ErrorKind, Result};
pub use ledger::CapacityLedger;
pub use sweeper::Sweeper;
