//! Error types for the booking engines.
//!
//! [`BookingError`] is what callers of the engines see. Each variant maps onto
//! one [`ErrorKind`]; only [`ErrorKind::Unavailable`] is worth retrying.
//! Storage backends report [`StoreError`], which converts into
//! `BookingError` at the engine boundary.

use booking_core::state_machine::TransitionError;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BookingError>;

/// Errors returned by the ledger and the engines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed input, amount mismatch, or resize below reserved
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Per-user ticket quota would be exceeded
    #[error("Quota exceeded: user already holds {held} of {max} tickets for this event, requested {requested}")]
    QuotaExceeded {
        /// Tickets already held in active reservations
        held: u32,
        /// Tickets requested now
        requested: u32,
        /// Configured per-user maximum
        max: u32,
    },

    /// Unknown id
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Operation not allowed in the record's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Not enough seats left
    #[error("Insufficient capacity for event {event_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Event
        event_id: u64,
        /// Seats requested
        requested: u32,
        /// Seats available when checked
        available: u32,
    },

    /// Payment intent past its expiry
    #[error("Payment intent {0} has expired")]
    Expired(String),

    /// A collaborator could not be reached or answered ambiguously
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Unexpected failure; the workflow was rolled back to a terminal state
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`BookingError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller error (includes quota)
    Validation,
    /// Unknown id
    NotFound,
    /// Wrong lifecycle status
    InvalidState,
    /// Sold out
    InsufficientCapacity,
    /// Too late
    Expired,
    /// Transient dependency failure
    Unavailable,
    /// Bug or unexpected failure
    Internal,
}

impl BookingError {
    /// Shorthand for [`BookingError::NotFound`]
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The taxonomy bucket this error belongs to
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::QuotaExceeded { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InsufficientCapacity { .. } => ErrorKind::InsufficientCapacity,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the call could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Metric label for this error
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InsufficientCapacity => "insufficient_capacity",
            ErrorKind::Expired => "expired",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl From<TransitionError> for BookingError {
    fn from(err: TransitionError) -> Self {
        Self::InvalidState(err.to_string())
    }
}

/// Errors reported by storage backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint (id, idempotency key, capture key) rejected the write
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The insert would push a user's active tickets past the quota
    #[error("Quota exceeded: {held} held, {requested} requested, max {max}")]
    QuotaExceeded {
        /// Tickets already held
        held: u32,
        /// Tickets requested
        requested: u32,
        /// Configured maximum
        max: u32,
    },

    /// Row does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Compare-and-set lost: the row is no longer in the expected status
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database or connection failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QuotaExceeded {
                held,
                requested,
                max,
            } => Self::QuotaExceeded {
                held,
                requested,
                max,
            },
            StoreError::NotFound(id) => Self::NotFound {
                entity: "record",
                id,
            },
            StoreError::Conflict(msg) => Self::InvalidState(msg),
            StoreError::DuplicateKey(msg) | StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}
