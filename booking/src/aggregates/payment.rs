//! Payment aggregate: one payment intent and its current capture attempt.
//!
//! The intent and payment live in the same store, so a single reducer owns
//! both. The processor call is not modelled here; the engine runs it between
//! `BeginCapture` and `CompleteCapture` with no lock held.

use crate::error::BookingError;
use crate::types::{
    ConfirmationStatus, Currency, IntentId, IntentStatus, Money, Payment, PaymentId,
    PaymentIntent, PaymentStatus, ReservationId, UserId,
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

/// What the reducer sees of one intent
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentState {
    /// The intent, once created
    pub intent: Option<PaymentIntent>,
    /// The capture attempt in progress or last finished, if any
    pub payment: Option<Payment>,
}

impl PaymentState {
    /// State for an existing intent without a loaded payment
    #[must_use]
    pub const fn for_intent(intent: PaymentIntent) -> Self {
        Self {
            intent: Some(intent),
            payment: None,
        }
    }
}

/// Result of asking the processor to charge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeOutcome {
    /// Money moved
    Approved {
        /// Processor transaction reference
        provider_reference: String,
    },
    /// Processor refused
    Declined {
        /// Processor's reason
        reason: String,
    },
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the payment aggregate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentAction {
    // Commands
    /// Create an intent for a reservation
    CreateIntent {
        /// Pre-generated id
        intent_id: IntentId,
        /// Reservation being paid for
        reservation_id: ReservationId,
        /// Payer
        user_id: UserId,
        /// Amount the caller wants to pay
        amount: Money,
        /// Currency
        currency: Currency,
        /// Total price of the reservation as reported by its owner
        reservation_total: Money,
        /// Client idempotency key
        idempotency_key: Option<String>,
        /// Method label
        payment_method: String,
        /// Free-form description
        description: Option<String>,
    },

    /// Start a capture: record a PROCESSING payment and lock the intent
    BeginCapture {
        /// Pre-generated payment id
        payment_id: PaymentId,
        /// Capture-scoped idempotency key
        capture_key: Option<String>,
    },

    /// Record the processor's answer
    CompleteCapture {
        /// Processor answer
        outcome: ChargeOutcome,
    },

    /// Fail an in-flight capture after an unexpected error
    AbortCapture {
        /// Error text
        reason: String,
    },

    /// Cancel an intent past its expiry
    Expire,

    /// Record whether the reservation was confirmed after a successful charge
    RecordConfirmation {
        /// New confirmation status
        status: ConfirmationStatus,
    },

    // Events
    /// Intent was created
    IntentCreated {
        /// The new intent
        intent: PaymentIntent,
    },

    /// Capture started
    CaptureStarted {
        /// The PROCESSING payment
        payment: Payment,
    },

    /// Charge approved
    PaymentSucceeded {
        /// Processor reference
        provider_reference: String,
        /// When
        captured_at: DateTime<Utc>,
    },

    /// Charge declined or errored
    PaymentFailed {
        /// Why
        reason: String,
        /// When
        failed_at: DateTime<Utc>,
    },

    /// Intent paid
    IntentSucceeded {
        /// When
        succeeded_at: DateTime<Utc>,
    },

    /// Intent cancelled after a decline or an error
    IntentCanceled {
        /// Why
        reason: String,
        /// When
        canceled_at: DateTime<Utc>,
    },

    /// Intent cancelled because it outlived its TTL
    IntentExpired {
        /// When
        expired_at: DateTime<Utc>,
    },

    /// Reservation confirmation progress changed
    ConfirmationRecorded {
        /// New status
        status: ConfirmationStatus,
        /// When
        recorded_at: DateTime<Utc>,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the payment aggregate
#[derive(Clone)]
pub struct PaymentEnvironment {
    /// Clock for timestamps and expiry
    pub clock: Arc<dyn Clock>,
    /// Intent lifetime
    pub intent_ttl: chrono::Duration,
}

impl PaymentEnvironment {
    /// Creates a new `PaymentEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, intent_ttl: chrono::Duration) -> Self {
        Self { clock, intent_ttl }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the payment aggregate
#[derive(Clone, Debug, Default)]
pub struct PaymentReducer;

impl PaymentReducer {
    /// Creates a new `PaymentReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn intent(state: &PaymentState) -> Result<&PaymentIntent, BookingError> {
        state
            .intent
            .as_ref()
            .ok_or_else(|| BookingError::InvalidState("Payment intent does not exist".to_string()))
    }

    fn processing_payment(state: &PaymentState) -> Result<&Payment, BookingError> {
        match &state.payment {
            Some(payment) if payment.status == PaymentStatus::Processing => Ok(payment),
            Some(payment) => Err(BookingError::InvalidState(format!(
                "Payment {} is {}, not PROCESSING",
                payment.id, payment.status
            ))),
            None => Err(BookingError::InvalidState(
                "No capture in progress".to_string(),
            )),
        }
    }

    fn validate_create_intent(
        state: &PaymentState,
        amount: Money,
        reservation_total: Money,
    ) -> Result<(), BookingError> {
        if let Some(existing) = &state.intent {
            return Err(BookingError::InvalidState(format!(
                "Payment intent {} already exists",
                existing.id
            )));
        }
        if amount.is_zero() {
            return Err(BookingError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }
        if amount != reservation_total {
            return Err(BookingError::Validation(format!(
                "Amount {amount} does not match reservation total {reservation_total}"
            )));
        }
        Ok(())
    }

    /// Applies an event to state
    #[allow(clippy::too_many_lines)]
    fn apply_event(state: &mut PaymentState, event: &PaymentAction) {
        match event {
            PaymentAction::IntentCreated { intent } => {
                state.intent = Some(intent.clone());
                state.payment = None;
            }
            PaymentAction::CaptureStarted { payment } => {
                if let Some(intent) = state.intent.as_mut() {
                    intent.status = IntentStatus::Processing;
                    intent.updated_at = payment.created_at;
                }
                state.payment = Some(payment.clone());
            }
            PaymentAction::PaymentSucceeded {
                provider_reference,
                captured_at,
            } => {
                if let Some(payment) = state.payment.as_mut() {
                    payment.status = PaymentStatus::Succeeded;
                    payment.provider_reference = Some(provider_reference.clone());
                    payment.captured_at = Some(*captured_at);
                    payment.confirmation = ConfirmationStatus::Pending;
                    payment.updated_at = *captured_at;
                }
            }
            PaymentAction::PaymentFailed { reason, failed_at } => {
                if let Some(payment) = state.payment.as_mut() {
                    payment.status = PaymentStatus::Failed;
                    payment.failure_reason = Some(reason.clone());
                    payment.updated_at = *failed_at;
                }
            }
            PaymentAction::IntentSucceeded { succeeded_at } => {
                if let Some(intent) = state.intent.as_mut() {
                    intent.status = IntentStatus::Succeeded;
                    intent.updated_at = *succeeded_at;
                }
            }
            PaymentAction::IntentCanceled { canceled_at, .. } => {
                if let Some(intent) = state.intent.as_mut() {
                    intent.status = IntentStatus::Canceled;
                    intent.updated_at = *canceled_at;
                }
            }
            PaymentAction::IntentExpired { expired_at } => {
                if let Some(intent) = state.intent.as_mut() {
                    intent.status = IntentStatus::Canceled;
                    intent.updated_at = *expired_at;
                }
            }
            PaymentAction::ConfirmationRecorded {
                status,
                recorded_at,
            } => {
                if let Some(payment) = state.payment.as_mut() {
                    payment.confirmation = *status;
                    payment.updated_at = *recorded_at;
                }
            }
            // Commands don't modify state
            PaymentAction::CreateIntent { .. }
            | PaymentAction::BeginCapture { .. }
            | PaymentAction::CompleteCapture { .. }
            | PaymentAction::AbortCapture { .. }
            | PaymentAction::Expire
            | PaymentAction::RecordConfirmation { .. } => {}
        }
    }

    #[allow(clippy::too_many_lines)]
    fn decide(
        state: &PaymentState,
        action: PaymentAction,
        env: &PaymentEnvironment,
    ) -> Result<SmallVec<[PaymentAction; 4]>, BookingError> {
        let now = env.clock.now();

        match action {
            PaymentAction::CreateIntent {
                intent_id,
                reservation_id,
                user_id,
                amount,
                currency,
                reservation_total,
                idempotency_key,
                payment_method,
                description,
            } => {
                Self::validate_create_intent(state, amount, reservation_total)?;
                Ok(smallvec![PaymentAction::IntentCreated {
                    intent: PaymentIntent {
                        id: intent_id,
                        reservation_id,
                        user_id,
                        amount,
                        currency,
                        status: IntentStatus::RequiresPaymentMethod,
                        idempotency_key,
                        payment_method,
                        description,
                        expires_at: now + env.intent_ttl,
                        created_at: now,
                        updated_at: now,
                    },
                }])
            }

            PaymentAction::BeginCapture {
                payment_id,
                capture_key,
            } => {
                let intent = Self::intent(state)?;
                if !intent.status.is_capturable() {
                    return Err(BookingError::InvalidState(format!(
                        "Payment intent {} is {} and cannot be captured",
                        intent.id, intent.status
                    )));
                }
                if intent.is_expired_at(now) {
                    return Ok(smallvec![PaymentAction::IntentExpired { expired_at: now }]);
                }
                Ok(smallvec![PaymentAction::CaptureStarted {
                    payment: Payment {
                        id: payment_id,
                        intent_id: intent.id.clone(),
                        reservation_id: intent.reservation_id.clone(),
                        user_id: intent.user_id,
                        amount: intent.amount,
                        currency: intent.currency.clone(),
                        status: PaymentStatus::Processing,
                        payment_method: intent.payment_method.clone(),
                        capture_key,
                        provider_reference: None,
                        failure_reason: None,
                        captured_at: None,
                        confirmation: ConfirmationStatus::NotRequired,
                        created_at: now,
                        updated_at: now,
                    },
                }])
            }

            PaymentAction::CompleteCapture { outcome } => {
                Self::processing_payment(state)?;
                Self::intent(state)?
                    .status
                    .ensure_transition(IntentStatus::Succeeded)?;
                Ok(match outcome {
                    ChargeOutcome::Approved { provider_reference } => smallvec![
                        PaymentAction::PaymentSucceeded {
                            provider_reference,
                            captured_at: now,
                        },
                        PaymentAction::IntentSucceeded { succeeded_at: now },
                    ],
                    ChargeOutcome::Declined { reason } => smallvec![
                        PaymentAction::PaymentFailed {
                            reason: reason.clone(),
                            failed_at: now,
                        },
                        PaymentAction::IntentCanceled {
                            reason,
                            canceled_at: now,
                        },
                    ],
                })
            }

            PaymentAction::AbortCapture { reason } => {
                let mut events = SmallVec::new();
                if Self::processing_payment(state).is_ok() {
                    events.push(PaymentAction::PaymentFailed {
                        reason: reason.clone(),
                        failed_at: now,
                    });
                }
                if Self::intent(state)?
                    .status
                    .can_transition_to(IntentStatus::Canceled)
                {
                    events.push(PaymentAction::IntentCanceled {
                        reason,
                        canceled_at: now,
                    });
                }
                Ok(events)
            }

            PaymentAction::Expire => {
                let intent = Self::intent(state)?;
                if !intent.status.is_sweepable() {
                    return Err(BookingError::InvalidState(format!(
                        "Payment intent {} is {} and cannot expire",
                        intent.id, intent.status
                    )));
                }
                if !intent.is_expired_at(now) {
                    return Err(BookingError::InvalidState(format!(
                        "Payment intent {} does not expire until {}",
                        intent.id, intent.expires_at
                    )));
                }
                Ok(smallvec![PaymentAction::IntentExpired { expired_at: now }])
            }

            PaymentAction::RecordConfirmation { status } => {
                let current = match &state.payment {
                    Some(payment) if payment.status == PaymentStatus::Succeeded => {
                        payment.confirmation
                    }
                    _ => {
                        return Err(BookingError::InvalidState(
                            "Only a succeeded payment carries a confirmation".to_string(),
                        ));
                    }
                };
                // A settled confirmation only repeats itself
                if current.is_settled() && current != status {
                    return Err(BookingError::InvalidState(format!(
                        "Payment confirmation is already {}",
                        current.as_str()
                    )));
                }
                if status == ConfirmationStatus::Refunded && current == status {
                    return Err(BookingError::InvalidState(
                        "Payment has already been refunded".to_string(),
                    ));
                }
                Ok(smallvec![PaymentAction::ConfirmationRecorded {
                    status,
                    recorded_at: now,
                }])
            }

            // ========== Events (replay) ==========
            event => Ok(smallvec![event]),
        }
    }

    /// Whether `action` is an event rather than a command
    const fn is_event(action: &PaymentAction) -> bool {
        !matches!(
            action,
            PaymentAction::CreateIntent { .. }
                | PaymentAction::BeginCapture { .. }
                | PaymentAction::CompleteCapture { .. }
                | PaymentAction::AbortCapture { .. }
                    | PaymentAction::Expire
                | PaymentAction::RecordConfirmation { .. }
        )
    }
}

impl Reducer for PaymentReducer {
    type State = PaymentState;
    type Action = PaymentAction;
    type Environment = PaymentEnvironment;
    type Error = BookingError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Action; 4]>, Self::Error> {
        let replay = Self::is_event(&action);
        let events = Self::decide(state, action, env)?;
        for event in &events {
            Self::apply_event(state, event);
        }
        if replay {
            return Ok(SmallVec::new());
        }
        Ok(events)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use booking_testing::{ReducerTest, assertions, test_clock};

    fn env() -> PaymentEnvironment {
        PaymentEnvironment::new(Arc::new(test_clock()), chrono::Duration::hours(24))
    }

    fn create_intent(amount: u64, total: u64) -> PaymentAction {
        PaymentAction::CreateIntent {
            intent_id: IntentId::parse("PI-0001").unwrap(),
            reservation_id: ReservationId::parse("RES-0001").unwrap(),
            user_id: UserId::new(1),
            amount: Money::from_cents(amount),
            currency: Currency::usd(),
            reservation_total: Money::from_cents(total),
            idempotency_key: None,
            payment_method: PaymentIntent::DEFAULT_PAYMENT_METHOD.to_string(),
            description: None,
        }
    }

    fn intent_state(status: IntentStatus, expires_in: chrono::Duration) -> PaymentState {
        let now = test_clock().now();
        PaymentState::for_intent(PaymentIntent {
            id: IntentId::parse("PI-0001").unwrap(),
            reservation_id: ReservationId::parse("RES-0001").unwrap(),
            user_id: UserId::new(1),
            amount: Money::from_cents(5000),
            currency: Currency::usd(),
            status,
            idempotency_key: None,
            payment_method: "CARD".to_string(),
            description: None,
            expires_at: now + expires_in,
            created_at: now,
            updated_at: now,
        })
    }

    fn capturing_state() -> PaymentState {
        let mut state =
            intent_state(IntentStatus::RequiresPaymentMethod, chrono::Duration::hours(1));
        PaymentReducer::new()
            .reduce(
                &mut state,
                PaymentAction::BeginCapture {
                    payment_id: PaymentId::parse("PAY-0001").unwrap(),
                    capture_key: Some("capture:k".to_string()),
                },
                &env(),
            )
            .unwrap();
        state
    }

    #[test]
    fn create_intent_sets_ttl_and_status() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::default())
            .when_action(create_intent(5000, 5000))
            .then_state(|state| {
                let intent = state.intent.as_ref().unwrap();
                assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
                assert_eq!(
                    intent.expires_at,
                    test_clock().now() + chrono::Duration::hours(24)
                );
                assert_eq!(intent.payment_method, "CARD");
            })
            .run();
    }

    #[test]
    fn amount_must_match_exactly() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::default())
            .when_action(create_intent(4999, 5000))
            .then_error(|err| assert_eq!(err.kind(), ErrorKind::Validation))
            .run();
    }

    #[test]
    fn zero_amount_rejected() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::default())
            .when_action(create_intent(0, 0))
            .then_error(|err| assert_eq!(err.kind(), ErrorKind::Validation))
            .run();
    }

    #[test]
    fn begin_capture_locks_intent() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(intent_state(
                IntentStatus::RequiresPaymentMethod,
                chrono::Duration::hours(1),
            ))
            .when_action(PaymentAction::BeginCapture {
                payment_id: PaymentId::parse("PAY-0001").unwrap(),
                capture_key: None,
            })
            .then_state(|state| {
                assert_eq!(state.intent.as_ref().unwrap().status, IntentStatus::Processing);
                let payment = state.payment.as_ref().unwrap();
                assert_eq!(payment.status, PaymentStatus::Processing);
                assert_eq!(payment.amount, Money::from_cents(5000));
            })
            .run();
    }

    #[test]
    fn begin_capture_after_expiry_cancels() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(intent_state(
                IntentStatus::RequiresPaymentMethod,
                chrono::Duration::seconds(-1),
            ))
            .when_action(PaymentAction::BeginCapture {
                payment_id: PaymentId::new(),
                capture_key: None,
            })
            .then_state(|state| {
                assert_eq!(state.intent.as_ref().unwrap().status, IntentStatus::Canceled);
                assert!(state.payment.is_none());
            })
            .then_events(|events| {
                assert!(matches!(events, [PaymentAction::IntentExpired { .. }]));
            })
            .run();
    }

    #[test]
    fn begin_capture_requires_capturable_status() {
        for status in [
            IntentStatus::Processing,
            IntentStatus::Succeeded,
            IntentStatus::Canceled,
            IntentStatus::RequiresAction,
        ] {
            ReducerTest::new(PaymentReducer::new())
                .with_env(env())
                .given_state(intent_state(status, chrono::Duration::hours(1)))
                .when_action(PaymentAction::BeginCapture {
                    payment_id: PaymentId::new(),
                    capture_key: None,
                })
                .then_error(|err| assert_eq!(err.kind(), ErrorKind::InvalidState))
                .run();
        }
    }

    #[test]
    fn approved_charge_succeeds_both() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(capturing_state())
            .when_action(PaymentAction::CompleteCapture {
                outcome: ChargeOutcome::Approved {
                    provider_reference: "txn_1".to_string(),
                },
            })
            .then_state(|state| {
                let payment = state.payment.as_ref().unwrap();
                assert_eq!(payment.status, PaymentStatus::Succeeded);
                assert_eq!(payment.provider_reference.as_deref(), Some("txn_1"));
                assert_eq!(payment.captured_at, Some(test_clock().now()));
                assert_eq!(payment.confirmation, ConfirmationStatus::Pending);
                assert_eq!(state.intent.as_ref().unwrap().status, IntentStatus::Succeeded);
            })
            .then_events(|events| assertions::assert_events_count(events, 2))
            .run();
    }

    #[test]
    fn declined_charge_fails_payment_and_cancels_intent() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(capturing_state())
            .when_action(PaymentAction::CompleteCapture {
                outcome: ChargeOutcome::Declined {
                    reason: "card declined".to_string(),
                },
            })
            .then_state(|state| {
                let payment = state.payment.as_ref().unwrap();
                assert_eq!(payment.status, PaymentStatus::Failed);
                assert_eq!(payment.failure_reason.as_deref(), Some("card declined"));
                assert_eq!(state.intent.as_ref().unwrap().status, IntentStatus::Canceled);
            })
            .run();
    }

    #[test]
    fn abort_leaves_everything_terminal() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(capturing_state())
            .when_action(PaymentAction::AbortCapture {
                reason: "store offline".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.payment.as_ref().unwrap().status, PaymentStatus::Failed);
                assert_eq!(state.intent.as_ref().unwrap().status, IntentStatus::Canceled);
            })
            .run();
    }

    #[test]
    fn expire_skips_processing_and_fresh_intents() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(intent_state(
                IntentStatus::Processing,
                chrono::Duration::seconds(-1),
            ))
            .when_action(PaymentAction::Expire)
            .then_error(|err| assert_eq!(err.kind(), ErrorKind::InvalidState))
            .run();

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(intent_state(
                IntentStatus::RequiresPaymentMethod,
                chrono::Duration::hours(1),
            ))
            .when_action(PaymentAction::Expire)
            .then_error(|err| assert_eq!(err.kind(), ErrorKind::InvalidState))
            .run();
    }

    #[test]
    fn expire_cancels_stale_intent() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(intent_state(
                IntentStatus::RequiresPaymentMethod,
                chrono::Duration::seconds(-1),
            ))
            .when_action(PaymentAction::Expire)
            .then_state(|state| {
                assert_eq!(state.intent.as_ref().unwrap().status, IntentStatus::Canceled);
            })
            .run();
    }

    #[test]
    fn confirmation_only_on_succeeded_payment() {
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(capturing_state())
            .when_action(PaymentAction::RecordConfirmation {
                status: ConfirmationStatus::Confirmed,
            })
            .then_error(|err| assert_eq!(err.kind(), ErrorKind::InvalidState))
            .run();
    }

    fn captured_state() -> PaymentState {
        let mut state = capturing_state();
        PaymentReducer::new()
            .reduce(
                &mut state,
                PaymentAction::CompleteCapture {
                    outcome: ChargeOutcome::Approved {
                        provider_reference: "txn_1".to_string(),
                    },
                },
                &env(),
            )
            .unwrap();
        state
    }

    #[test]
    fn refunded_confirmation_is_final() {
        let mut state = captured_state();
        PaymentReducer::new()
            .reduce(
                &mut state,
                PaymentAction::RecordConfirmation {
                    status: ConfirmationStatus::Refunded,
                },
                &env(),
            )
            .unwrap();

        for status in [ConfirmationStatus::Confirmed, ConfirmationStatus::Refunded] {
            ReducerTest::new(PaymentReducer::new())
                .with_env(env())
                .given_state(state.clone())
                .when_action(PaymentAction::RecordConfirmation { status })
                .then_error(|err| assert_eq!(err.kind(), ErrorKind::InvalidState))
                .run();
        }
    }

    #[test]
    fn confirmed_payment_cannot_be_refunded() {
        let mut state = captured_state();
        PaymentReducer::new()
            .reduce(
                &mut state,
                PaymentAction::RecordConfirmation {
                    status: ConfirmationStatus::Confirmed,
                },
                &env(),
            )
            .unwrap();

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(state.clone())
            .when_action(PaymentAction::RecordConfirmation {
                status: ConfirmationStatus::Refunded,
            })
            .then_error(|err| assert_eq!(err.kind(), ErrorKind::InvalidState))
            .run();
        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(state)
            .when_action(PaymentAction::RecordConfirmation {
                status: ConfirmationStatus::Confirmed,
            })
            .then_state(|state| {
                assert_eq!(
                    state.payment.as_ref().unwrap().confirmation,
                    ConfirmationStatus::Confirmed
                );
            })
            .run();
    }
}
