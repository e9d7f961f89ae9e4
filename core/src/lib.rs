//! # Booking Core
//!
//! Shared building blocks for the booking workspace.
//!
//! Every workflow in the booking crate is written the same way: an engine loads
//! the rows it needs, hands them to a pure [`reducer::Reducer`] together with a
//! command, and persists whatever the reducer decided. The reducer never touches
//! I/O; the engine never makes business decisions.
//!
//! ## Modules
//!
//! - [`reducer`]: the `(State, Action, Environment) → Events` trait
//! - [`environment`]: injected dependencies (the [`environment::Clock`])
//! - [`state_machine`]: transition tables for status enums
//! - [`idempotency`]: validated client idempotency keys
//! - [`saga`]: compensation plans for cross-service workflows
//! - [`retry`]: exponential backoff for transient failures
//!
//! ## Example
//!
//! ```ignore
//! use booking_core::reducer::Reducer;
//!
//! impl Reducer for CapacityReducer {
//!     type State = EventCapacity;
//!     type Action = CapacityAction;
//!     type Environment = CapacityEnvironment;
//!     type Error = BookingError;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut EventCapacity,
//!         action: CapacityAction,
//!         env: &CapacityEnvironment,
//!     ) -> Result<SmallVec<[CapacityAction; 4]>, BookingError> {
//!         // Validate, apply events, return them
//!         Ok(SmallVec::new())
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

pub mod idempotency;
pub mod retry;
pub mod saga;
pub mod state_machine;

/// Reducer module - the core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Events)`.
/// Actions mix commands (requests) and events (facts). A reducer validates a
/// command, applies the resulting events to the state in place, and returns the
/// events so the caller can persist them.
pub mod reducer {
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: Commands and the events they produce
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Error`: Rejection type for commands that fail validation
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Error returned when a command is rejected
        type Error;

        /// Reduce an action into state changes
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Applies the resulting events to state in place
        /// 3. Returns the applied events
        ///
        /// A rejected command leaves `state` untouched.
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the command is not valid for `state`.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Self::Action; 4]>, Self::Error>;
    }
}

/// Environment module - dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected via the
/// Environment parameter of a reducer or the constructor of an engine.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
