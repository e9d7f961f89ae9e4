//! Payment engine: intents, captures, expiry and confirmation reconciliation.
//!
//! # Capture
//!
//! ```text
//! load intent ─▶ capture-key replay? ─▶ capturable? ─▶ expired? ─▶ reservation PENDING?
//!                                                                        │
//!        ┌───────────────── BeginCapture (payment PROCESSING + intent CAS) ◀┘
//!        ▼
//!   processor.charge  (no lock held)
//!        │
//!        ├─ Approved ─▶ CompleteCapture ─▶ ConfirmReservation (failure leaves
//!        │                                  confirmation PENDING for reconciliation;
//!        │                                  a reservation cancelled meanwhile is refunded)
//!        ├─ Declined ─▶ CompleteCapture ─▶ capture-failure policy
//!        └─ error ────▶ compensation: refund (if charged), AbortCapture
//! ```
//!
//! The intent never stays PROCESSING once `capture` returns.

use crate::aggregates::{
    ChargeOutcome, PaymentAction, PaymentEnvironment, PaymentReducer, PaymentState,
};
use crate::capabilities::ReservationCapability;
use crate::config::{CaptureFailurePolicy, PaymentConfig};
use crate::error::{BookingError, ErrorKind, Result, StoreError};
use crate::metrics::{CompensationMetrics, PaymentMetrics};
use crate::processor::{ChargeRequest, PaymentProcessor};
use crate::stores::PaymentStore;
use crate::types::{
    ConfirmationStatus, Currency, IntentId, Money, Payment, PaymentId, PaymentIntent,
    ReservationId, ReservationStatus, UserId,
};
use booking_core::environment::Clock;
use booking_core::idempotency::IdempotencyKey;
use booking_core::reducer::Reducer;
use booking_core::saga::CompensationPlan;
use std::sync::Arc;
use std::time::Instant;

/// Input to [`PaymentEngine::create_intent`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateIntentRequest {
    /// Reservation being paid for
    pub reservation_id: ReservationId,
    /// Payer
    pub user_id: UserId,
    /// Must equal the reservation total
    pub amount: Money,
    /// Three-letter uppercase code
    pub currency: String,
    /// Client idempotency key
    pub idempotency_key: Option<String>,
    /// Method label, `CARD` when absent
    pub payment_method: Option<String>,
    /// Free-form description
    pub description: Option<String>,
}

impl CreateIntentRequest {
    /// USD request without key, method or description
    #[must_use]
    pub fn new(reservation_id: ReservationId, user_id: UserId, amount: Money) -> Self {
        Self {
            reservation_id,
            user_id,
            amount,
            currency: Currency::usd().as_str().to_string(),
            idempotency_key: None,
            payment_method: None,
            description: None,
        }
    }

    /// Attach an idempotency key
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Use a different currency
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}

/// Creates and captures payment intents
pub struct PaymentEngine {
    store: Arc<dyn PaymentStore>,
    reservations: Arc<dyn ReservationCapability>,
    processor: Arc<dyn PaymentProcessor>,
    env: PaymentEnvironment,
    capture_failure_policy: CaptureFailurePolicy,
    sweep_batch_size: usize,
}

impl PaymentEngine {
    /// Engine over `store`, verifying reservations through `reservations`
    #[must_use]
    pub fn new(
        config: &PaymentConfig,
        store: Arc<dyn PaymentStore>,
        reservations: Arc<dyn ReservationCapability>,
        processor: Arc<dyn PaymentProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            reservations,
            processor,
            env: PaymentEnvironment::new(clock, config.intent_ttl()),
            capture_failure_policy: config.capture_failure_policy,
            sweep_batch_size: config.sweep_batch_size.max(1),
        }
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Create an intent to pay a reservation's total.
    ///
    /// # Errors
    ///
    /// - `Validation` for a zero or mismatched amount, a bad currency, or a
    ///   reservation that belongs to another user
    /// - `NotFound` for an unknown reservation
    /// - `Unavailable` when the reservation side cannot be reached
    pub async fn create_intent(&self, request: CreateIntentRequest) -> Result<PaymentIntent> {
        let CreateIntentRequest {
            reservation_id,
            user_id,
            amount,
            currency,
            idempotency_key,
            payment_method,
            description,
        } = request;

        let idempotency_key = parse_key(idempotency_key)?;
        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.store.find_intent_by_key(key.as_str()).await? {
                tracing::info!(
                    intent_id = %existing.id,
                    idempotency_key = %key,
                    "Returning existing payment intent for idempotency key"
                );
                return Ok(existing);
            }
        }

        if amount.is_zero() {
            return Err(BookingError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }
        let currency = Currency::parse(&currency).ok_or_else(|| {
            BookingError::Validation(format!(
                "Currency must be a three-letter uppercase code, got '{currency}'"
            ))
        })?;

        let reservation = self.reservations.get_reservation(&reservation_id).await?;
        if reservation.user_id != user_id {
            return Err(BookingError::Validation(format!(
                "Reservation {reservation_id} does not belong to user {user_id}"
            )));
        }

        let mut state = PaymentState::default();
        PaymentReducer::new().reduce(
            &mut state,
            PaymentAction::CreateIntent {
                intent_id: IntentId::new(),
                reservation_id,
                user_id,
                amount,
                currency,
                reservation_total: reservation.total_price,
                idempotency_key: idempotency_key.map(String::from),
                payment_method: payment_method
                    .filter(|method| !method.trim().is_empty())
                    .unwrap_or_else(|| PaymentIntent::DEFAULT_PAYMENT_METHOD.to_string()),
                description,
            },
            &self.env,
        )?;
        let intent = state
            .intent
            .ok_or_else(|| BookingError::Internal("Reducer produced no intent".to_string()))?;

        match self.store.insert_intent(intent.clone()).await {
            Ok(()) => {
                tracing::info!(
                    intent_id = %intent.id,
                    reservation_id = %intent.reservation_id,
                    amount = %intent.amount,
                    currency = %intent.currency,
                    expires_at = %intent.expires_at,
                    "Payment intent created"
                );
                Ok(intent)
            }
            Err(StoreError::DuplicateKey(msg)) => {
                let Some(key) = intent.idempotency_key.as_deref() else {
                    return Err(BookingError::Internal(msg));
                };
                let winner = self.store.find_intent_by_key(key).await?.ok_or_else(|| {
                    BookingError::Internal(format!(
                        "Idempotency key {key} conflicted but no intent carries it"
                    ))
                })?;
                tracing::info!(
                    intent_id = %winner.id,
                    idempotency_key = key,
                    "Lost idempotency race, returning winner"
                );
                Ok(winner)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Look up an intent.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn get_intent(&self, id: &IntentId) -> Result<PaymentIntent> {
        self.store
            .get_intent(id)
            .await?
            .ok_or_else(|| BookingError::not_found("payment intent", id))
    }

    /// A user's intents, newest first.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn list_intents_by_user(&self, user_id: UserId) -> Result<Vec<PaymentIntent>> {
        Ok(self.store.list_intents_by_user(user_id).await?)
    }

    // ========================================================================
    // Capture
    // ========================================================================

    /// Charge an intent.
    ///
    /// With an idempotency key, a repeated call returns the payment the first
    /// call created without charging again.
    ///
    /// Returns the payment in its final state: SUCCEEDED, or FAILED for a
    /// declined charge. A SUCCEEDED payment whose reservation was cancelled or
    /// expired while the charge was in flight comes back refunded, with
    /// confirmation REFUNDED.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown intent
    /// - `Validation` when the key was used to capture a different intent
    /// - `InvalidState` unless the intent is capturable and its reservation
    ///   is PENDING
    /// - `Expired` past the intent's expiry (the intent is cancelled)
    /// - `Unavailable` when the processor or reservation side gave no answer
    pub async fn capture(
        &self,
        intent_id: &IntentId,
        idempotency_key: Option<&str>,
    ) -> Result<Payment> {
        let intent = self.get_intent(intent_id).await?;

        let capture_key = parse_key(idempotency_key.map(str::to_string))?
            .map(|key| key.scoped("capture"));
        if let Some(existing) = self.replayed_capture(intent_id, capture_key.as_deref()).await? {
            return Ok(existing);
        }

        if !intent.status.is_capturable() {
            return Err(BookingError::InvalidState(format!(
                "Payment intent {intent_id} is {} and cannot be captured",
                intent.status
            )));
        }
        if intent.is_expired_at(self.env.clock.now()) {
            self.expire_for_capture(intent_id).await?;
            return Err(BookingError::Expired(intent_id.to_string()));
        }

        let reservation = self.reservations.get_reservation(&intent.reservation_id).await?;
        if reservation.status != ReservationStatus::Pending {
            // A same-key capture may have finished and confirmed it meanwhile
            if let Some(existing) = self
                .replayed_capture(intent_id, capture_key.as_deref())
                .await?
            {
                return Ok(existing);
            }
            return Err(BookingError::InvalidState(format!(
                "Reservation {} is {} and cannot be paid",
                reservation.id, reservation.status
            )));
        }

        let payment_id = PaymentId::new();
        let started = match self
            .apply(
                intent_id,
                PaymentAction::BeginCapture {
                    payment_id: payment_id.clone(),
                    capture_key: capture_key.clone(),
                },
            )
            .await
        {
            Ok(state) => state,
            Err(err) if err.kind() == ErrorKind::InvalidState => {
                // Lost to a concurrent capture; same key means same payment
                if let Some(existing) = self
                    .replayed_capture(intent_id, capture_key.as_deref())
                    .await?
                {
                    return Ok(existing);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let payment = match started.payment {
            Some(payment) if payment.id == payment_id => payment,
            _ => {
                PaymentMetrics::record_expired(1);
                tracing::info!(intent_id = %intent_id, "Payment intent expired at capture");
                return Err(BookingError::Expired(intent_id.to_string()));
            }
        };
        tracing::info!(
            intent_id = %intent_id,
            payment_id = %payment_id,
            amount = %payment.amount,
            "Capture started"
        );

        self.charge(payment).await
    }

    async fn replayed_capture(
        &self,
        intent_id: &IntentId,
        capture_key: Option<&str>,
    ) -> Result<Option<Payment>> {
        let Some(key) = capture_key else {
            return Ok(None);
        };
        match self.store.find_payment_by_capture_key(key).await? {
            Some(payment) if payment.intent_id == *intent_id => {
                tracing::info!(
                    payment_id = %payment.id,
                    capture_key = key,
                    "Returning existing payment for capture key"
                );
                Ok(Some(payment))
            }
            Some(payment) => Err(BookingError::Validation(format!(
                "Idempotency key already used to capture payment intent {}",
                payment.intent_id
            ))),
            None => Ok(None),
        }
    }

    async fn expire_for_capture(&self, intent_id: &IntentId) -> Result<()> {
        match self.apply(intent_id, PaymentAction::Expire).await {
            Ok(_) => {
                PaymentMetrics::record_expired(1);
                tracing::info!(intent_id = %intent_id, "Payment intent expired at capture");
                Ok(())
            }
            // Already cancelled by the sweep
            Err(err) if err.kind() == ErrorKind::InvalidState => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Run the processor call and record its outcome; `payment` is PROCESSING.
    async fn charge(&self, payment: Payment) -> Result<Payment> {
        let intent_id = payment.intent_id.clone();

        let mut plan = CompensationPlan::<BookingError>::new("capture_payment");
        {
            let store = Arc::clone(&self.store);
            let env = self.env.clone();
            let intent_id = intent_id.clone();
            plan.register("abort_capture", move || async move {
                apply_action(
                    store.as_ref(),
                    &env,
                    &intent_id,
                    PaymentAction::AbortCapture {
                        reason: "Capture did not complete".to_string(),
                    },
                )
                .await
                .map(|_| ())
            });
        }

        let request = ChargeRequest {
            payment_id: payment.id.clone(),
            intent_id: intent_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method: payment.payment_method.clone(),
        };
        let started = Instant::now();
        let outcome = self.processor.charge(request).await;
        let elapsed = started.elapsed();

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    intent_id = %intent_id,
                    payment_id = %payment.id,
                    error = %err,
                    "Processor gave no answer, aborting capture"
                );
                self.compensate(plan).await;
                PaymentMetrics::record_capture("error", elapsed);
                return Err(BookingError::Unavailable(err.to_string()));
            }
        };

        if let ChargeOutcome::Approved { provider_reference } = &outcome {
            let processor = Arc::clone(&self.processor);
            let provider_reference = provider_reference.clone();
            let amount = payment.amount;
            plan.register("refund_charge", move || async move {
                processor
                    .refund(&provider_reference, amount)
                    .await
                    .map(|_| ())
                    .map_err(|e| BookingError::Internal(e.to_string()))
            });
        }

        let completed = match self
            .apply(
                &intent_id,
                PaymentAction::CompleteCapture {
                    outcome: outcome.clone(),
                },
            )
            .await
        {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(
                    intent_id = %intent_id,
                    payment_id = %payment.id,
                    error = %err,
                    "Failed to record capture outcome, compensating"
                );
                self.compensate(plan).await;
                PaymentMetrics::record_capture("error", elapsed);
                return Err(err);
            }
        };
        plan.complete();

        let payment = completed
            .payment
            .ok_or_else(|| BookingError::Internal("Capture lost its payment".to_string()))?;

        match outcome {
            ChargeOutcome::Approved { .. } => {
                PaymentMetrics::record_capture("succeeded", elapsed);
                tracing::info!(
                    intent_id = %intent_id,
                    payment_id = %payment.id,
                    provider_reference = payment.provider_reference.as_deref().unwrap_or_default(),
                    "Payment captured"
                );
                Ok(self.confirm_after_capture(payment).await)
            }
            ChargeOutcome::Declined { reason } => {
                PaymentMetrics::record_capture("failed", elapsed);
                tracing::warn!(
                    intent_id = %intent_id,
                    payment_id = %payment.id,
                    reason = %reason,
                    "Payment declined"
                );
                self.apply_failure_policy(&payment.reservation_id).await;
                Ok(payment)
            }
        }
    }

    async fn compensate(&self, plan: CompensationPlan<BookingError>) {
        let report = plan.compensate().await;
        CompensationMetrics::record(
            "capture_payment",
            if report.is_clean() { "completed" } else { "failed" },
        );
    }

    /// Confirm the reservation; a failure leaves the payment flagged for
    /// [`Self::reconcile_confirmations`].
    async fn confirm_after_capture(&self, payment: Payment) -> Payment {
        self.settle(&payment).await.unwrap_or(payment)
    }

    /// Bring a charged payment in line with its reservation: confirm it, or
    /// refund the charge when the reservation was cancelled or expired while
    /// the charge was in flight. Returns the settled payment, or `None` when
    /// it stays PENDING for another attempt.
    async fn settle(&self, payment: &Payment) -> Option<Payment> {
        let reservation_status = match self
            .reservations
            .confirm_reservation(&payment.reservation_id)
            .await
        {
            Ok(_) => ReservationStatus::Confirmed,
            Err(err) if err.kind() == ErrorKind::InvalidState => {
                match self.reservations.get_reservation(&payment.reservation_id).await {
                    Ok(reservation) => reservation.status,
                    Err(err) => {
                        tracing::warn!(
                            payment_id = %payment.id,
                            reservation_id = %payment.reservation_id,
                            error = %err,
                            "Reservation lookup failed, left for reconciliation"
                        );
                        return None;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    reservation_id = %payment.reservation_id,
                    error = %err,
                    "Reservation confirmation failed after capture, left for reconciliation"
                );
                return None;
            }
        };

        match reservation_status {
            ReservationStatus::Confirmed => {
                self.record_confirmation(payment, ConfirmationStatus::Confirmed)
                    .await
            }
            ReservationStatus::Cancelled | ReservationStatus::Expired => {
                self.refund_unconfirmable(payment, reservation_status).await
            }
            ReservationStatus::Pending => {
                tracing::warn!(
                    payment_id = %payment.id,
                    reservation_id = %payment.reservation_id,
                    "Reservation still PENDING after a refused confirmation"
                );
                None
            }
        }
    }

    /// Claim the payment for a refund under its row lock, then refund.
    ///
    /// Only one caller wins the claim, so a charge is refunded at most once.
    async fn refund_unconfirmable(
        &self,
        payment: &Payment,
        reservation_status: ReservationStatus,
    ) -> Option<Payment> {
        let Some(provider_reference) = payment.provider_reference.clone() else {
            tracing::error!(payment_id = %payment.id, "Charged payment has no provider reference");
            return None;
        };

        let claimed = match self
            .apply(
                &payment.intent_id,
                PaymentAction::RecordConfirmation {
                    status: ConfirmationStatus::Refunded,
                },
            )
            .await
        {
            Ok(state) => state.payment?,
            Err(err) if err.kind() == ErrorKind::InvalidState => {
                // Settled by a concurrent capture or sweep
                return self.settled_payment(payment).await;
            }
            Err(err) => {
                tracing::warn!(payment_id = %payment.id, error = %err, "Failed to claim refund");
                return None;
            }
        };

        match self
            .processor
            .refund(&provider_reference, payment.amount)
            .await
        {
            Ok(refund_reference) => {
                CompensationMetrics::record("settle_payment", "completed");
                tracing::info!(
                    payment_id = %payment.id,
                    reservation_id = %payment.reservation_id,
                    reservation_status = %reservation_status,
                    refund_reference = %refund_reference,
                    "Charge refunded, reservation ended before confirmation"
                );
            }
            Err(err) => {
                CompensationMetrics::record("settle_payment", "failed");
                tracing::error!(
                    payment_id = %payment.id,
                    provider_reference = %provider_reference,
                    amount = %payment.amount,
                    error = %err,
                    "Refund failed for a charge whose reservation is gone"
                );
            }
        }
        Some(claimed)
    }

    async fn settled_payment(&self, payment: &Payment) -> Option<Payment> {
        match self.store.get_payment(&payment.id).await {
            Ok(current) => current.filter(|p| p.confirmation.is_settled()),
            Err(err) => {
                tracing::warn!(payment_id = %payment.id, error = %err, "Failed to reload payment");
                None
            }
        }
    }

    async fn record_confirmation(
        &self,
        payment: &Payment,
        status: ConfirmationStatus,
    ) -> Option<Payment> {
        match self
            .apply(&payment.intent_id, PaymentAction::RecordConfirmation { status })
            .await
        {
            Ok(state) => state.payment,
            Err(err) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    error = %err,
                    "Failed to record reservation confirmation"
                );
                None
            }
        }
    }

    async fn apply_failure_policy(&self, reservation_id: &ReservationId) {
        match self.capture_failure_policy {
            CaptureFailurePolicy::KeepReservation => {}
            CaptureFailurePolicy::CancelReservation => {
                if let Err(err) = self.reservations.cancel_reservation(reservation_id).await {
                    tracing::warn!(
                        reservation_id = %reservation_id,
                        error = %err,
                        "Failed to cancel reservation after declined payment"
                    );
                } else {
                    tracing::info!(
                        reservation_id = %reservation_id,
                        "Reservation cancelled after declined payment"
                    );
                }
            }
        }
    }

    /// Look up a payment.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn get_payment(&self, id: &PaymentId) -> Result<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| BookingError::not_found("payment", id))
    }

    /// A user's payments, newest first.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn list_payments_by_user(&self, user_id: UserId) -> Result<Vec<Payment>> {
        Ok(self.store.list_payments_by_user(user_id).await?)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Cancel intents past their expiry that are not SUCCEEDED, CANCELED or
    /// PROCESSING. Returns how many were cancelled.
    ///
    /// Each cancellation re-checks the intent under its lock, so an intent a
    /// capture locked in the meantime is skipped.
    ///
    /// # Errors
    ///
    /// Storage failures while listing candidates.
    pub async fn expire_stale_intents(&self) -> Result<usize> {
        let now = self.env.clock.now();
        let candidates = self.store.expired_intents(now, self.sweep_batch_size).await?;

        let mut expired = 0_usize;
        for id in candidates {
            match self.apply(&id, PaymentAction::Expire).await {
                Ok(_) => expired += 1,
                Err(err) if err.kind() == ErrorKind::InvalidState => {
                    tracing::debug!(intent_id = %id, error = %err, "Skipping intent");
                }
                Err(err) => {
                    tracing::warn!(intent_id = %id, error = %err, "Failed to expire intent");
                }
            }
        }

        if expired > 0 {
            PaymentMetrics::record_expired(u64::try_from(expired).unwrap_or(u64::MAX));
            tracing::info!(count = expired, "Expired stale payment intents");
        }
        Ok(expired)
    }

    /// Settle succeeded payments whose reservation was not confirmed at
    /// capture time: confirm the reservation, or refund the charge if the
    /// reservation was cancelled or expired meanwhile. Returns how many were
    /// settled.
    ///
    /// # Errors
    ///
    /// Storage failures while listing candidates.
    pub async fn reconcile_confirmations(&self) -> Result<usize> {
        let pending = self.store.awaiting_confirmation(self.sweep_batch_size).await?;

        let mut reconciled = 0_usize;
        for payment in pending {
            if let Some(settled) = self.settle(&payment).await {
                reconciled += 1;
                tracing::info!(
                    payment_id = %settled.id,
                    reservation_id = %settled.reservation_id,
                    confirmation = settled.confirmation.as_str(),
                    "Payment confirmation reconciled"
                );
            }
        }
        Ok(reconciled)
    }

    async fn apply(&self, id: &IntentId, action: PaymentAction) -> Result<PaymentState> {
        apply_action(self.store.as_ref(), &self.env, id, action).await
    }
}

fn parse_key(raw: Option<String>) -> Result<Option<IdempotencyKey>> {
    raw.map(IdempotencyKey::parse)
        .transpose()
        .map_err(|e| BookingError::Validation(e.to_string()))
}

/// Run one reducer action against an intent under its row lock
async fn apply_action(
    store: &dyn PaymentStore,
    env: &PaymentEnvironment,
    id: &IntentId,
    action: PaymentAction,
) -> Result<PaymentState> {
    let env = env.clone();
    store
        .update_intent(
            id,
            Box::new(move |state: &mut PaymentState| {
                PaymentReducer::new().reduce(state, action, &env)?;
                Ok(())
            }),
        )
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capabilities::{LocalEventCapability, LocalReservationCapability};
    use crate::catalog::InMemoryEventCatalog;
    use crate::config::ReservationConfig;
    use crate::engines::{CreateReservationRequest, ReservationEngine};
    use crate::ledger::CapacityLedger;
    use crate::mocks::ScriptedProcessor;
    use crate::processor::ProcessorError;
    use crate::stores::{InMemoryCapacityStore, InMemoryPaymentStore, InMemoryReservationStore};
    use crate::types::{EventId, EventStatus, IntentStatus, PaymentStatus, Reservation};
    use booking_testing::{ManualClock, test_clock};

    struct Fixture {
        payments: PaymentEngine,
        reservations: Arc<ReservationEngine>,
        processor: Arc<ScriptedProcessor>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(policy: CaptureFailurePolicy) -> Fixture {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let ledger = CapacityLedger::new(Arc::new(InMemoryCapacityStore::new()), clock.clone());
        ledger.create(EventId::new(5), 100).await.unwrap();
        let catalog = Arc::new(InMemoryEventCatalog::new());
        catalog
            .upsert(EventId::new(5), EventStatus::Published, Money::from_cents(2500))
            .await;

        let reservations = Arc::new(ReservationEngine::new(
            &ReservationConfig::default(),
            Arc::new(InMemoryReservationStore::new()),
            Arc::new(LocalEventCapability::new(catalog, ledger)),
            clock.clone(),
        ));
        let processor = Arc::new(ScriptedProcessor::new());
        let payments = PaymentEngine::new(
            &PaymentConfig {
                capture_failure_policy: policy,
                ..PaymentConfig::default()
            },
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(LocalReservationCapability::new(Arc::clone(&reservations))),
            processor.clone(),
            clock.clone(),
        );
        Fixture {
            payments,
            reservations,
            processor,
            clock,
        }
    }

    async fn reserve(f: &Fixture, quantity: u32) -> Reservation {
        f.reservations
            .create(CreateReservationRequest::new(UserId::new(1), EventId::new(5), quantity))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn approved_capture_confirms_reservation() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        let reservation = reserve(&f, 2).await;
        let intent = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id.clone(),
                UserId::new(1),
                Money::from_cents(5000),
            ))
            .await
            .unwrap();

        let payment = f.payments.capture(&intent.id, Some("cap-1")).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.confirmation, ConfirmationStatus::Confirmed);
        assert_eq!(payment.capture_key.as_deref(), Some("capture:cap-1"));
        assert_eq!(
            f.payments.get_intent(&intent.id).await.unwrap().status,
            IntentStatus::Succeeded
        );
        assert_eq!(
            f.reservations.get(&reservation.id).await.unwrap().status,
            ReservationStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn amount_must_match_reservation_total() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        let reservation = reserve(&f, 2).await;

        let err = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id,
                UserId::new(1),
                Money::from_cents(4999),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn bad_currency_and_foreign_user_rejected() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        let reservation = reserve(&f, 1).await;

        let err = f
            .payments
            .create_intent(
                CreateIntentRequest::new(
                    reservation.id.clone(),
                    UserId::new(1),
                    Money::from_cents(2500),
                )
                .with_currency("usd"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id,
                UserId::new(2),
                Money::from_cents(2500),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn intent_key_replays() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        let reservation = reserve(&f, 1).await;
        let request =
            CreateIntentRequest::new(reservation.id, UserId::new(1), Money::from_cents(2500))
                .with_idempotency_key("pi-1");

        let first = f.payments.create_intent(request.clone()).await.unwrap();
        let second = f.payments.create_intent(request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.payments.list_intents_by_user(UserId::new(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn declined_capture_keeps_reservation_by_default() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        f.processor.push(Ok(ChargeOutcome::Declined {
            reason: "card declined".to_string(),
        }));
        let reservation = reserve(&f, 1).await;
        let intent = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id.clone(),
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();

        let payment = f.payments.capture(&intent.id, None).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("card declined"));
        assert_eq!(
            f.payments.get_intent(&intent.id).await.unwrap().status,
            IntentStatus::Canceled
        );
        assert_eq!(
            f.reservations.get(&reservation.id).await.unwrap().status,
            ReservationStatus::Pending
        );
    }

    #[tokio::test]
    async fn declined_capture_cancels_reservation_when_configured() {
        let f = fixture(CaptureFailurePolicy::CancelReservation).await;
        f.processor.push(Ok(ChargeOutcome::Declined {
            reason: "card declined".to_string(),
        }));
        let reservation = reserve(&f, 1).await;
        let intent = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id.clone(),
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();

        f.payments.capture(&intent.id, None).await.unwrap();
        assert_eq!(
            f.reservations.get(&reservation.id).await.unwrap().status,
            ReservationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn processor_error_leaves_intent_terminal() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        f.processor.push(Err(ProcessorError::Timeout));
        let reservation = reserve(&f, 1).await;
        let intent = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id,
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();

        let err = f.payments.capture(&intent.id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        assert_eq!(
            f.payments.get_intent(&intent.id).await.unwrap().status,
            IntentStatus::Canceled
        );
        let payments = f.payments.list_payments_by_user(UserId::new(1)).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn capture_after_ttl_expires_intent() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        let reservation = reserve(&f, 1).await;
        let intent = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id,
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::hours(25));
        let err = f.payments.capture(&intent.id, None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Expired);
        assert_eq!(
            f.payments.get_intent(&intent.id).await.unwrap().status,
            IntentStatus::Canceled
        );
        assert_eq!(f.processor.charges(), 0);
    }

    #[tokio::test]
    async fn capture_key_on_other_intent_rejected() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        let first = reserve(&f, 1).await;
        let second = reserve(&f, 1).await;
        let a = f
            .payments
            .create_intent(CreateIntentRequest::new(
                first.id,
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();
        let b = f
            .payments
            .create_intent(CreateIntentRequest::new(
                second.id,
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();

        f.payments.capture(&a.id, Some("shared")).await.unwrap();
        let err = f.payments.capture(&b.id, Some("shared")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn sweep_cancels_only_expired() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        let reservation = reserve(&f, 1).await;
        let old = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id.clone(),
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::hours(23));
        let fresh = f
            .payments
            .create_intent(CreateIntentRequest::new(
                reservation.id,
                UserId::new(1),
                Money::from_cents(2500),
            ))
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::hours(2));

        assert_eq!(f.payments.expire_stale_intents().await.unwrap(), 1);
        assert_eq!(f.payments.expire_stale_intents().await.unwrap(), 0);
        assert_eq!(
            f.payments.get_intent(&old.id).await.unwrap().status,
            IntentStatus::Canceled
        );
        assert_eq!(
            f.payments.get_intent(&fresh.id).await.unwrap().status,
            IntentStatus::RequiresPaymentMethod
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let f = fixture(CaptureFailurePolicy::KeepReservation).await;
        assert_eq!(
            f.payments.capture(&IntentId::new(), None).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            f.payments.get_payment(&PaymentId::new()).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
