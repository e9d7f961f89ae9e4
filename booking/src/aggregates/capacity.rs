//! Capacity aggregate: seat counters for one event.
//!
//! The reducer is the only place that decides whether a reserve, release or
//! resize is allowed. It does not serialize access; the ledger (or the database
//! row lock) guarantees that one event's counters are reduced by one caller at a
//! time.

use crate::error::BookingError;
use crate::types::EventCapacity;
use booking_core::{SmallVec, environment::Clock, reducer::Reducer, smallvec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the capacity aggregate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityAction {
    // Commands
    /// Hold seats; all or nothing
    Reserve {
        /// Seats to hold
        quantity: u32,
    },

    /// Return seats; clamps at zero
    Release {
        /// Seats to return
        quantity: u32,
    },

    /// Change the venue size
    Resize {
        /// New total capacity
        total: u32,
    },

    // Events
    /// Seats were held
    Reserved {
        /// Seats held
        quantity: u32,
    },

    /// Seats were returned
    Released {
        /// Seats the caller asked to return
        requested: u32,
        /// Seats actually returned (`min(requested, reserved)`)
        released: u32,
    },

    /// Total capacity changed
    Resized {
        /// Previous total
        previous: u32,
        /// New total
        total: u32,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the capacity aggregate
#[derive(Clone)]
pub struct CapacityEnvironment {
    /// Clock for `updated_at`
    pub clock: Arc<dyn Clock>,
}

impl CapacityEnvironment {
    /// Creates a new `CapacityEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the capacity aggregate
#[derive(Clone, Debug, Default)]
pub struct CapacityReducer;

impl CapacityReducer {
    /// Creates a new `CapacityReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn validate_quantity(quantity: u32) -> Result<(), BookingError> {
        if quantity == 0 {
            return Err(BookingError::Validation(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies an event to state
    fn apply_event(state: &mut EventCapacity, event: &CapacityAction) {
        match event {
            CapacityAction::Reserved { quantity } => {
                state.reserved = state.reserved.saturating_add(*quantity).min(state.total);
            }
            CapacityAction::Released { released, .. } => {
                state.reserved = state.reserved.saturating_sub(*released);
            }
            CapacityAction::Resized { total, .. } => {
                state.total = (*total).max(state.reserved);
            }
            // Commands don't modify state
            CapacityAction::Reserve { .. }
            | CapacityAction::Release { .. }
            | CapacityAction::Resize { .. } => return,
        }
        state.available = state.total - state.reserved;
    }
}

impl Reducer for CapacityReducer {
    type State = EventCapacity;
    type Action = CapacityAction;
    type Environment = CapacityEnvironment;
    type Error = BookingError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Action; 4]>, Self::Error> {
        let event = match action {
            CapacityAction::Reserve { quantity } => {
                Self::validate_quantity(quantity)?;
                if state.available < quantity {
                    return Err(BookingError::InsufficientCapacity {
                        event_id: state.event_id.get(),
                        requested: quantity,
                        available: state.available,
                    });
                }
                CapacityAction::Reserved { quantity }
            }

            CapacityAction::Release { quantity } => {
                Self::validate_quantity(quantity)?;
                CapacityAction::Released {
                    requested: quantity,
                    released: quantity.min(state.reserved),
                }
            }

            CapacityAction::Resize { total } => {
                if total < state.reserved {
                    return Err(BookingError::Validation(format!(
                        "Cannot resize event {} to {total}: {} seats already reserved",
                        state.event_id, state.reserved
                    )));
                }
                CapacityAction::Resized {
                    previous: state.total,
                    total,
                }
            }

            // ========== Events (replay) ==========
            event => {
                Self::apply_event(state, &event);
                return Ok(SmallVec::new());
            }
        };

        Self::apply_event(state, &event);
        state.updated_at = env.clock.now();
        Ok(smallvec![event])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::EventId;
    use booking_testing::{ReducerTest, assertions, test_clock};
    use proptest::prelude::*;

    fn env() -> CapacityEnvironment {
        CapacityEnvironment::new(Arc::new(test_clock()))
    }

    fn capacity(total: u32, reserved: u32) -> EventCapacity {
        let mut capacity = EventCapacity::new(EventId::new(5), total, test_clock().now());
        capacity.reserved = reserved;
        capacity.available = total - reserved;
        capacity
    }

    #[test]
    fn reserve_exact_remaining_succeeds() {
        ReducerTest::new(CapacityReducer::new())
            .with_env(env())
            .given_state(capacity(3, 0))
            .when_action(CapacityAction::Reserve { quantity: 3 })
            .then_state(|state| {
                assert_eq!(state.reserved, 3);
                assert_eq!(state.available, 0);
            })
            .then_events(|events| {
                assert_eq!(events, [CapacityAction::Reserved { quantity: 3 }]);
            })
            .run();
    }

    #[test]
    fn reserve_beyond_available_fails_without_mutation() {
        ReducerTest::new(CapacityReducer::new())
            .with_env(env())
            .given_state(capacity(3, 3))
            .when_action(CapacityAction::Reserve { quantity: 1 })
            .then_error(|err| {
                assert_eq!(err.kind(), ErrorKind::InsufficientCapacity);
                assert!(matches!(
                    err,
                    BookingError::InsufficientCapacity {
                        requested: 1,
                        available: 0,
                        ..
                    }
                ));
            })
            .run();
    }

    #[test]
    fn zero_quantity_is_validation_error() {
        for action in [
            CapacityAction::Reserve { quantity: 0 },
            CapacityAction::Release { quantity: 0 },
        ] {
            ReducerTest::new(CapacityReducer::new())
                .with_env(env())
                .given_state(capacity(10, 2))
                .when_action(action)
                .then_error(|err| assert_eq!(err.kind(), ErrorKind::Validation))
                .run();
        }
    }

    #[test]
    fn release_clamps_at_zero() {
        ReducerTest::new(CapacityReducer::new())
            .with_env(env())
            .given_state(capacity(10, 2))
            .when_action(CapacityAction::Release { quantity: 5 })
            .then_state(|state| {
                assert_eq!(state.reserved, 0);
                assert_eq!(state.available, 10);
            })
            .then_events(|events| {
                assert_eq!(
                    events,
                    [CapacityAction::Released {
                        requested: 5,
                        released: 2
                    }]
                );
            })
            .run();
    }

    #[test]
    fn resize_below_reserved_rejected() {
        ReducerTest::new(CapacityReducer::new())
            .with_env(env())
            .given_state(capacity(10, 6))
            .when_action(CapacityAction::Resize { total: 5 })
            .then_error(|err| assert_eq!(err.kind(), ErrorKind::Validation))
            .run();
    }

    #[test]
    fn resize_recomputes_available() {
        ReducerTest::new(CapacityReducer::new())
            .with_env(env())
            .given_state(capacity(10, 6))
            .when_action(CapacityAction::Resize { total: 20 })
            .then_state(|state| {
                assert_eq!(state.total, 20);
                assert_eq!(state.available, 14);
            })
            .run();
    }

    #[test]
    fn replayed_event_applies_without_emitting() {
        ReducerTest::new(CapacityReducer::new())
            .with_env(env())
            .given_state(capacity(10, 0))
            .when_action(CapacityAction::Reserved { quantity: 4 })
            .then_state(|state| assert_eq!(state.available, 6))
            .then_events(assertions::assert_no_events)
            .run();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(u32),
        Release(u32),
        Resize(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8).prop_map(Op::Reserve),
            (0u32..8).prop_map(Op::Release),
            (0u32..40).prop_map(Op::Resize),
        ]
    }

    proptest! {
        #[test]
        fn counters_stay_consistent(total in 0u32..40, ops in prop::collection::vec(op(), 0..64)) {
            let reducer = CapacityReducer::new();
            let env = env();
            let mut state = capacity(total, 0);

            for op in ops {
                let action = match op {
                    Op::Reserve(q) => CapacityAction::Reserve { quantity: q },
                    Op::Release(q) => CapacityAction::Release { quantity: q },
                    Op::Resize(t) => CapacityAction::Resize { total: t },
                };
                let before = state.clone();
                if reducer.reduce(&mut state, action, &env).is_err() {
                    prop_assert_eq!(&state, &before);
                }
                prop_assert!(state.is_consistent());
            }
        }
    }
}
