//! Reservation aggregate.
//!
//! Decides whether a reservation may be created (quantity bounds, line items,
//! per-user quota, price arithmetic) and which status transitions are legal.
//! Capacity is not this aggregate's concern: the engine reserves seats before
//! `Create` and releases them after `Cancel`.

use crate::error::BookingError;
use crate::types::{
    EventId, ItemRequest, Money, Reservation, ReservationId, ReservationItem, ReservationStatus,
    UserId,
};
use booking_core::{
    DateTime, SmallVec, Utc, environment::Clock, reducer::Reducer, smallvec,
    state_machine::StateMachine,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// State
// ============================================================================

/// What the reducer sees of one reservation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReservationState {
    /// The reservation, once created
    pub reservation: Option<Reservation>,
    /// Tickets the same user already holds for the same event in other active
    /// reservations (only consulted by `Create`)
    pub active_quantity: u32,
}

impl ReservationState {
    /// State for a reservation that does not exist yet
    #[must_use]
    pub const fn new(active_quantity: u32) -> Self {
        Self {
            reservation: None,
            active_quantity,
        }
    }

    /// State for an existing reservation
    #[must_use]
    pub const fn existing(reservation: Reservation) -> Self {
        Self {
            reservation: Some(reservation),
            active_quantity: 0,
        }
    }
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the reservation aggregate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationAction {
    // Commands
    /// Create a PENDING reservation
    Create {
        /// Pre-generated id
        reservation_id: ReservationId,
        /// Customer
        user_id: UserId,
        /// Event
        event_id: EventId,
        /// Tickets requested
        quantity: u32,
        /// Catalog price per ticket
        unit_price: Money,
        /// Optional itemisation; empty means one `STANDARD` line
        items: Vec<ItemRequest>,
        /// Client idempotency key
        idempotency_key: Option<String>,
    },

    /// Mark a PENDING reservation as paid
    Confirm,

    /// Cancel an active reservation
    Cancel,

    /// Expire a PENDING reservation
    Expire,

    // Events
    /// Reservation was created
    Created {
        /// The new reservation
        reservation: Reservation,
    },

    /// Reservation was confirmed
    Confirmed {
        /// When
        confirmed_at: DateTime<Utc>,
    },

    /// Reservation was cancelled; its seats must be released
    Cancelled {
        /// Seats to return to the ledger
        quantity: u32,
        /// When
        cancelled_at: DateTime<Utc>,
    },

    /// Reservation expired; its seats must be released
    Expired {
        /// Seats to return to the ledger
        quantity: u32,
        /// When
        expired_at: DateTime<Utc>,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the reservation aggregate
#[derive(Clone)]
pub struct ReservationEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Per-user, per-event ticket quota
    pub max_tickets_per_user_per_event: u32,
}

impl ReservationEnvironment {
    /// Creates a new `ReservationEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, max_tickets_per_user_per_event: u32) -> Self {
        Self {
            clock,
            max_tickets_per_user_per_event,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the reservation aggregate
#[derive(Clone, Debug, Default)]
pub struct ReservationReducer;

impl ReservationReducer {
    /// Creates a new `ReservationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Checks the quantity bounds and the per-user quota.
    ///
    /// Shared with the engine, which runs it before touching capacity.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a quantity outside `1..=max`,
    /// [`BookingError::QuotaExceeded`] when `held + quantity > max`.
    pub fn validate_quota(held: u32, quantity: u32, max: u32) -> Result<(), BookingError> {
        if quantity == 0 {
            return Err(BookingError::Validation(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        if quantity > max {
            return Err(BookingError::Validation(format!(
                "Cannot reserve more than {max} tickets (requested: {quantity})"
            )));
        }
        if held.saturating_add(quantity) > max {
            return Err(BookingError::QuotaExceeded {
                held,
                requested: quantity,
                max,
            });
        }
        Ok(())
    }

    /// Builds line items, defaulting to a single `STANDARD` line
    fn build_items(
        items: Vec<ItemRequest>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Vec<ReservationItem>, BookingError> {
        if items.is_empty() {
            return Ok(vec![ReservationItem {
                ticket_type: ReservationItem::DEFAULT_TICKET_TYPE.to_string(),
                quantity,
                unit_price,
            }]);
        }

        let mut sum: u32 = 0;
        let mut built = Vec::with_capacity(items.len());
        for item in items {
            if item.ticket_type.trim().is_empty() {
                return Err(BookingError::Validation(
                    "Ticket type is required".to_string(),
                ));
            }
            if item.quantity == 0 {
                return Err(BookingError::Validation(format!(
                    "Item '{}' must have a quantity of at least 1",
                    item.ticket_type
                )));
            }
            sum = sum.saturating_add(item.quantity);
            built.push(ReservationItem {
                ticket_type: item.ticket_type,
                quantity: item.quantity,
                unit_price,
            });
        }

        if sum != quantity {
            return Err(BookingError::Validation(format!(
                "Item quantities sum to {sum}, expected {quantity}"
            )));
        }
        Ok(built)
    }

    fn transition(
        state: &ReservationState,
        next: ReservationStatus,
    ) -> Result<&Reservation, BookingError> {
        let reservation = state
            .reservation
            .as_ref()
            .ok_or_else(|| BookingError::InvalidState("Reservation does not exist".to_string()))?;
        if !reservation.status.can_transition_to(next) {
            return Err(BookingError::InvalidState(format!(
                "Reservation {} is {} and cannot become {next}",
                reservation.id, reservation.status
            )));
        }
        Ok(reservation)
    }

    /// Applies an event to state
    fn apply_event(state: &mut ReservationState, event: &ReservationAction) {
        match event {
            ReservationAction::Created { reservation } => {
                state.active_quantity = state.active_quantity.saturating_add(reservation.quantity);
                state.reservation = Some(reservation.clone());
            }
            ReservationAction::Confirmed { confirmed_at } => {
                if let Some(reservation) = state.reservation.as_mut() {
                    reservation.status = ReservationStatus::Confirmed;
                    reservation.updated_at = *confirmed_at;
                }
            }
            ReservationAction::Cancelled { cancelled_at, .. } => {
                if let Some(reservation) = state.reservation.as_mut() {
                    reservation.status = ReservationStatus::Cancelled;
                    reservation.updated_at = *cancelled_at;
                }
            }
            ReservationAction::Expired { expired_at, .. } => {
                if let Some(reservation) = state.reservation.as_mut() {
                    reservation.status = ReservationStatus::Expired;
                    reservation.updated_at = *expired_at;
                }
            }
            // Commands don't modify state
            ReservationAction::Create { .. }
            | ReservationAction::Confirm
            | ReservationAction::Cancel
            | ReservationAction::Expire => {}
        }
    }
}

impl Reducer for ReservationReducer {
    type State = ReservationState;
    type Action = ReservationAction;
    type Environment = ReservationEnvironment;
    type Error = BookingError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Action; 4]>, Self::Error> {
        let now = env.clock.now();

        let event = match action {
            ReservationAction::Create {
                reservation_id,
                user_id,
                event_id,
                quantity,
                unit_price,
                items,
                idempotency_key,
            } => {
                if let Some(existing) = &state.reservation {
                    return Err(BookingError::InvalidState(format!(
                        "Reservation {} already exists",
                        existing.id
                    )));
                }
                Self::validate_quota(
                    state.active_quantity,
                    quantity,
                    env.max_tickets_per_user_per_event,
                )?;
                let items = Self::build_items(items, quantity, unit_price)?;
                let total_price = unit_price.checked_multiply(quantity).ok_or_else(|| {
                    BookingError::Validation("Total price overflows".to_string())
                })?;

                ReservationAction::Created {
                    reservation: Reservation {
                        id: reservation_id,
                        user_id,
                        event_id,
                        quantity,
                        total_price,
                        status: ReservationStatus::Pending,
                        idempotency_key,
                        items,
                        created_at: now,
                        updated_at: now,
                    },
                }
            }

            ReservationAction::Confirm => {
                Self::transition(state, ReservationStatus::Confirmed)?;
                ReservationAction::Confirmed { confirmed_at: now }
            }

            ReservationAction::Cancel => {
                let reservation = Self::transition(state, ReservationStatus::Cancelled)?;
                ReservationAction::Cancelled {
                    quantity: reservation.quantity,
                    cancelled_at: now,
                }
            }

            ReservationAction::Expire => {
                let reservation = Self::transition(state, ReservationStatus::Expired)?;
                ReservationAction::Expired {
                    quantity: reservation.quantity,
                    expired_at: now,
                }
            }

            // ========== Events (replay) ==========
            event => {
                Self::apply_event(state, &event);
                return Ok(SmallVec::new());
            }
        };

        Self::apply_event(state, &event);
        Ok(smallvec![event])
    }
}
