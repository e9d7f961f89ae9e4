//! Domain types for event bookings.
//!
//! Identifiers, money, statuses and the three persisted records (capacity,
//! reservation, payment intent/payment). Status enums carry their transition
//! tables via [`StateMachine`].

use booking_core::state_machine::StateMachine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a bookable event, assigned by the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw catalog id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a customer, assigned by the user service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Wrap a raw user id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, externally visible identifiers: a fixed prefix plus 32 random hex digits.
macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix every id of this kind starts with
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random id
            #[must_use]
            pub fn new() -> Self {
                Self(format!(
                    "{}{}",
                    Self::PREFIX,
                    Uuid::new_v4().simple().to_string().to_uppercase()
                ))
            }

            /// Accept an id received from a caller or another service.
            ///
            /// Returns `None` unless the id carries the expected prefix and a
            /// non-empty alphanumeric body.
            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                let body = raw.strip_prefix(Self::PREFIX)?;
                if body.is_empty() || !body.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return None;
                }
                Some(Self(raw.to_string()))
            }

            /// Borrow the id text
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

prefixed_id!(
    /// Unique identifier for a reservation (`RES-…`)
    ReservationId,
    "RES-"
);

prefixed_id!(
    /// Unique identifier for a payment intent (`PI-…`)
    IntentId,
    "PI-"
);

prefixed_id!(
    /// Unique identifier for a payment attempt (`PAY-…`)
    PaymentId,
    "PAY-"
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in minor units (cents); equality is exact
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a ticket quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// ISO-4217 style currency code (three uppercase ASCII letters).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Validate a currency code.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        (code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()))
            .then(|| Self(code.to_string()))
    }

    /// US dollars, the default settlement currency
    #[must_use]
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    /// Borrow the code
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Catalog view
// ============================================================================

/// Publication status of an event in the catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Being prepared, not visible to customers
    Draft,
    /// Open for booking
    Published,
    /// Took place
    Completed,
    /// Called off
    Cancelled,
}

impl EventStatus {
    /// Only published events accept reservations
    #[must_use]
    pub const fn is_bookable(self) -> bool {
        matches!(self, Self::Published)
    }
}

/// The slice of catalog data the reservation engine needs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Event
    pub event_id: EventId,
    /// Publication status
    pub status: EventStatus,
    /// Price of one standard ticket
    pub unit_price: Money,
}

// ============================================================================
// Capacity
// ============================================================================

/// Seat counters for one event.
///
/// `available == total - reserved` and `reserved <= total` hold between
/// every pair of operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCapacity {
    /// Event these counters belong to
    pub event_id: EventId,
    /// Seats the venue holds
    pub total: u32,
    /// Seats held by reservations (pending or confirmed)
    pub reserved: u32,
    /// Seats still bookable
    pub available: u32,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl EventCapacity {
    /// Fresh counters with nothing reserved
    #[must_use]
    pub const fn new(event_id: EventId, total: u32, now: DateTime<Utc>) -> Self {
        Self {
            event_id,
            total,
            reserved: 0,
            available: total,
            updated_at: now,
        }
    }

    /// Whether the counters satisfy their invariant
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.reserved <= self.total && self.available == self.total - self.reserved
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Reservation lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Capacity held, awaiting payment
    Pending,
    /// Paid
    Confirmed,
    /// Cancelled by the customer or a failed payment
    Cancelled,
    /// Hold lapsed
    Expired,
}

impl ReservationStatus {
    /// Statuses that count against capacity and the per-user quota
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Confirmed];

    /// Whether the reservation still holds capacity
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Stable text form used in storage and on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Inverse of [`Self::as_str`]
    #[must_use]
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl StateMachine for ReservationStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Cancelled | Self::Expired)
                | (Self::Confirmed, Self::Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    /// Ticket category, e.g. `STANDARD` or `VIP`
    pub ticket_type: String,
    /// Tickets of this type
    pub quantity: u32,
    /// Price per ticket
    pub unit_price: Money,
}

impl ReservationItem {
    /// Ticket type used when the caller does not itemise
    pub const DEFAULT_TICKET_TYPE: &'static str = "STANDARD";

    /// Line total, `None` on overflow
    #[must_use]
    pub const fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Caller-supplied line item; the price always comes from the catalog
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    /// Ticket category
    pub ticket_type: String,
    /// Tickets of this type
    pub quantity: u32,
}

/// A customer's hold on tickets for one event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID
    pub id: ReservationId,
    /// Customer
    pub user_id: UserId,
    /// Event
    pub event_id: EventId,
    /// Tickets held
    pub quantity: u32,
    /// Amount a payment intent must match
    pub total_price: Money,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Client key the reservation was created under
    pub idempotency_key: Option<String>,
    /// Line items; their quantities sum to `quantity`
    pub items: Vec<ReservationItem>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Payment intent
// ============================================================================

/// Payment intent lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    /// Created without a payment method step
    Created,
    /// Waiting for the customer to capture
    RequiresPaymentMethod,
    /// Processor requested additional customer action
    RequiresAction,
    /// Awaiting explicit confirmation
    RequiresConfirmation,
    /// Capture in flight
    Processing,
    /// Charged
    Succeeded,
    /// Abandoned, declined or expired
    Canceled,
}

impl IntentStatus {
    /// Whether `capture` may start from this status
    #[must_use]
    pub const fn is_capturable(self) -> bool {
        matches!(self, Self::Created | Self::RequiresPaymentMethod)
    }

    /// Whether the expiry sweep may cancel an intent in this status
    #[must_use]
    pub const fn is_sweepable(self) -> bool {
        !matches!(self, Self::Succeeded | Self::Canceled | Self::Processing)
    }

    /// Stable text form used in storage and on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::RequiresPaymentMethod => "REQUIRES_PAYMENT_METHOD",
            Self::RequiresAction => "REQUIRES_ACTION",
            Self::RequiresConfirmation => "REQUIRES_CONFIRMATION",
            Self::Processing => "PROCESSING",
            Self::Succeeded => "SUCCEEDED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Inverse of [`Self::as_str`]
    #[must_use]
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "CREATED" => Some(Self::Created),
            "REQUIRES_PAYMENT_METHOD" => Some(Self::RequiresPaymentMethod),
            "REQUIRES_ACTION" => Some(Self::RequiresAction),
            "REQUIRES_CONFIRMATION" => Some(Self::RequiresConfirmation),
            "PROCESSING" => Some(Self::Processing),
            "SUCCEEDED" => Some(Self::Succeeded),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl StateMachine for IntentStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Succeeded | Self::Canceled => false,
            Self::Processing => matches!(next, Self::Succeeded | Self::Canceled),
            Self::Created
            | Self::RequiresPaymentMethod
            | Self::RequiresAction
            | Self::RequiresConfirmation => {
                matches!(next, Self::Processing | Self::Canceled) && *self != next
            }
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount the customer has agreed to pay for one reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Intent ID
    pub id: IntentId,
    /// Reservation being paid for
    pub reservation_id: ReservationId,
    /// Payer
    pub user_id: UserId,
    /// Amount; equals the reservation total at creation
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Lifecycle status
    pub status: IntentStatus,
    /// Client key the intent was created under
    pub idempotency_key: Option<String>,
    /// Method label, `CARD` unless the caller says otherwise
    pub payment_method: String,
    /// Free-form description
    pub description: Option<String>,
    /// Capture is refused after this instant
    pub expires_at: DateTime<Utc>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Payment method label applied when none is given
    pub const DEFAULT_PAYMENT_METHOD: &'static str = "CARD";

    /// Whether the intent is past its expiry at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

// ============================================================================
// Payment
// ============================================================================

/// Payment attempt lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Recorded, not yet sent
    Pending,
    /// Sent to the processor
    Processing,
    /// Charged
    Succeeded,
    /// Declined or errored
    Failed,
    /// Abandoned before reaching the processor
    Canceled,
    /// Processor requested additional customer action
    RequiresAction,
}

impl PaymentStatus {
    /// Stable text form used in storage and on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::RequiresAction => "REQUIRES_ACTION",
        }
    }

    /// Inverse of [`Self::as_str`]
    #[must_use]
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "CANCELED" => Some(Self::Canceled),
            "REQUIRES_ACTION" => Some(Self::RequiresAction),
            _ => None,
        }
    }
}

impl StateMachine for PaymentStatus {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Canceled | Self::Failed)
                | (
                    Self::Processing,
                    Self::Succeeded | Self::Failed | Self::Canceled | Self::RequiresAction
                )
                | (Self::RequiresAction, Self::Succeeded | Self::Failed | Self::Canceled)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a successful charge has been reflected on the reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    /// Payment did not succeed, nothing to confirm
    NotRequired,
    /// Charged, but the reservation has not been confirmed yet
    Pending,
    /// Reservation confirmed
    Confirmed,
    /// Reservation was cancelled or expired before it could be confirmed;
    /// the charge was given back
    Refunded,
}

impl ConfirmationStatus {
    /// Stable text form used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotRequired => "NOT_REQUIRED",
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Nothing left to reconcile
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Confirmed | Self::Refunded)
    }

    /// Inverse of [`Self::as_str`]
    #[must_use]
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "NOT_REQUIRED" => Some(Self::NotRequired),
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// One attempt to charge an intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID
    pub id: PaymentId,
    /// Intent being captured
    pub intent_id: IntentId,
    /// Reservation being paid for
    pub reservation_id: ReservationId,
    /// Payer
    pub user_id: UserId,
    /// Amount charged
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Lifecycle status
    pub status: PaymentStatus,
    /// Method label copied from the intent
    pub payment_method: String,
    /// Capture-scoped idempotency key (`capture:<client key>`)
    pub capture_key: Option<String>,
    /// Processor transaction reference
    pub provider_reference: Option<String>,
    /// Why the payment failed
    pub failure_reason: Option<String>,
    /// When the charge succeeded
    pub captured_at: Option<DateTime<Utc>>,
    /// Reservation confirmation progress
    pub confirmation: ConfirmationStatus,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}
