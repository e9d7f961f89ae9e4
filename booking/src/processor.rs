//! Payment processor boundary.
//!
//! The payment engine calls the processor between `BeginCapture` and
//! `CompleteCapture`, with no lock held. A declined card is an ordinary
//! [`ChargeOutcome::Declined`]; [`ProcessorError`] means the processor could
//! not give an answer at all.

use crate::aggregates::ChargeOutcome;
use crate::config::ProcessorConfig;
use crate::types::{Currency, IntentId, Money, PaymentId};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Processor result
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Processor could not complete the call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// No answer within the deadline
    #[error("Payment processor timed out")]
    Timeout,

    /// Processor unreachable or returned an unusable response
    #[error("Payment processor unavailable: {0}")]
    Unavailable(String),

    /// Refund refused
    #[error("Refund rejected: {0}")]
    RefundRejected(String),
}

/// One charge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Payment being captured; doubles as the processor's idempotency key
    pub payment_id: PaymentId,
    /// Intent being paid
    pub intent_id: IntentId,
    /// Amount to charge
    pub amount: Money,
    /// Currency
    pub currency: Currency,
    /// Method label
    pub payment_method: String,
}

/// Card processor abstraction
pub trait PaymentProcessor: Send + Sync {
    /// Charge the customer.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] when no decision could be obtained.
    fn charge(
        &self,
        request: ChargeRequest,
    ) -> Pin<Box<dyn Future<Output = ProcessorResult<ChargeOutcome>> + Send>>;

    /// Return a captured amount.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] if the refund was not accepted.
    fn refund(
        &self,
        provider_reference: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = ProcessorResult<String>> + Send>>;
}

/// Processor that approves a configurable share of charges after a random delay
#[derive(Clone, Debug)]
pub struct SimulatedProcessor {
    success_rate: f64,
    min_latency: Duration,
    max_latency: Duration,
}

impl SimulatedProcessor {
    /// Processor with the given approval probability and latency bounds
    #[must_use]
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            success_rate: config.success_rate.clamp(0.0, 1.0),
            min_latency: Duration::from_millis(config.min_latency_ms),
            max_latency: Duration::from_millis(config.max_latency_ms.max(config.min_latency_ms)),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared(config: &ProcessorConfig) -> Arc<dyn PaymentProcessor> {
        Arc::new(Self::new(config))
    }

    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let latency = if self.max_latency > self.min_latency {
            rng.gen_range(self.min_latency..=self.max_latency)
        } else {
            self.min_latency
        };
        (latency, rng.gen_bool(self.success_rate))
    }
}

impl PaymentProcessor for SimulatedProcessor {
    fn charge(
        &self,
        request: ChargeRequest,
    ) -> Pin<Box<dyn Future<Output = ProcessorResult<ChargeOutcome>> + Send>> {
        let (latency, approved) = self.roll();
        Box::pin(async move {
            tokio::time::sleep(latency).await;

            let outcome = if approved {
                ChargeOutcome::Approved {
                    provider_reference: format!("txn_{}", request.intent_id),
                }
            } else {
                ChargeOutcome::Declined {
                    reason: "Payment processing failed - simulated failure".to_string(),
                }
            };

            tracing::debug!(
                payment_id = %request.payment_id,
                amount = request.amount.cents(),
                approved,
                latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                "Simulated charge"
            );
            Ok(outcome)
        })
    }

    fn refund(
        &self,
        provider_reference: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = ProcessorResult<String>> + Send>> {
        let provider_reference = provider_reference.to_string();
        let (latency, _) = self.roll();
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            let refund_id = format!("refund_{}", uuid::Uuid::new_v4().simple());
            tracing::info!(
                provider_reference = %provider_reference,
                amount = amount.cents(),
                refund_id = %refund_id,
                "Simulated refund"
            );
            Ok(refund_id)
        })
    }
}
