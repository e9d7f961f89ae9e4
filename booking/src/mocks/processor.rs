//! Scripted payment processor.

use crate::aggregates::ChargeOutcome;
use crate::processor::{ChargeRequest, PaymentProcessor, ProcessorResult};
use crate::types::Money;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Processor that answers from a script, approving once the script runs out.
///
/// [`Self::hold_charges`] makes every charge wait for a permit, which lets a
/// test observe an intent while its capture is in flight.
#[derive(Debug, Default)]
pub struct ScriptedProcessor {
    script: Mutex<VecDeque<ProcessorResult<ChargeOutcome>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Arc<Notify>,
    charges: Arc<AtomicUsize>,
    refunds: Arc<AtomicUsize>,
}

impl ScriptedProcessor {
    /// Processor that approves everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer for the next unanswered charge
    pub fn push(&self, result: ProcessorResult<ChargeOutcome>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    /// Make charges block until the returned gate is notified, once per charge
    pub fn hold_charges(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&gate));
        gate
    }

    /// Wait until a charge has reached the processor
    pub async fn wait_for_charge(&self) {
        self.entered.notified().await;
    }

    /// Charges received so far
    #[must_use]
    pub fn charges(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    /// Refunds received so far
    #[must_use]
    pub fn refunds(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

impl PaymentProcessor for ScriptedProcessor {
    fn charge(
        &self,
        request: ChargeRequest,
    ) -> Pin<Box<dyn Future<Output = ProcessorResult<ChargeOutcome>> + Send>> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let gate = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let entered = Arc::clone(&self.entered);

        Box::pin(async move {
            entered.notify_one();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            scripted.unwrap_or_else(|| {
                Ok(ChargeOutcome::Approved {
                    provider_reference: format!("txn_{}", request.intent_id),
                })
            })
        })
    }

    fn refund(
        &self,
        provider_reference: &str,
        _amount: Money,
    ) -> Pin<Box<dyn Future<Output = ProcessorResult<String>> + Send>> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        let refund_id = format!("refund_{provider_reference}");
        Box::pin(async move { Ok(refund_id) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::processor::ProcessorError;
    use crate::types::{Currency, IntentId, PaymentId};

    fn request() -> ChargeRequest {
        ChargeRequest {
            payment_id: PaymentId::new(),
            intent_id: IntentId::parse("PI-1").unwrap(),
            amount: Money::from_cents(100),
            currency: Currency::usd(),
            payment_method: "CARD".to_string(),
        }
    }

    #[tokio::test]
    async fn follows_script_then_approves() {
        let processor = ScriptedProcessor::new();
        processor.push(Err(ProcessorError::Timeout));

        assert_eq!(processor.charge(request()).await, Err(ProcessorError::Timeout));
        assert!(matches!(
            processor.charge(request()).await,
            Ok(ChargeOutcome::Approved { .. })
        ));
        assert_eq!(processor.charges(), 2);
    }

    #[tokio::test]
    async fn held_charge_waits_for_gate() {
        let processor = Arc::new(ScriptedProcessor::new());
        let gate = processor.hold_charges();

        let charging = tokio::spawn({
            let processor = Arc::clone(&processor);
            async move { processor.charge(request()).await }
        });
        processor.wait_for_charge().await;
        assert!(!charging.is_finished());

        gate.notify_one();
        assert!(charging.await.unwrap().is_ok());
    }
}
