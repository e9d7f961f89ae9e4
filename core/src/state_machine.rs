//! Transition tables for status enums.
//!
//! Reservation, intent, and payment statuses are all small finite state
//! machines. Implementing [`StateMachine`] for a status enum puts the legal
//! edges in one place so reducers check them the same way.

use std::fmt::Debug;
use thiserror::Error;

/// A transition that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot transition from {from} to {to}")]
pub struct TransitionError {
    /// Status the record was in
    pub from: String,
    /// Status that was requested
    pub to: String,
}

/// A status enum with an explicit transition table.
pub trait StateMachine: Copy + Eq + Debug {
    /// Whether no further transition is possible from this status.
    fn is_terminal(&self) -> bool;

    /// Whether `self → next` is a legal edge.
    fn can_transition_to(&self, next: Self) -> bool;

    /// Check the edge `self → next`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the edge is not in the table.
    fn ensure_transition(&self, next: Self) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            })
        }
    }
}
