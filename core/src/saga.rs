//! Compensation plans for workflows that span several services.
//!
//! There is no distributed transaction between the capacity ledger, the
//! reservation store and the payment store. A workflow that commits a side
//! effect in one of them and then fails in the next must undo the first one
//! itself. A [`CompensationPlan`] records those undo steps as the workflow
//! progresses:
//!
//! 1. After each committed side effect, [`CompensationPlan::register`] its reversal.
//! 2. On failure, [`CompensationPlan::compensate`] runs the reversals newest first.
//! 3. On success, [`CompensationPlan::complete`] disarms the plan.
//!
//! ```ignore
//! let mut plan = CompensationPlan::new("create_reservation");
//! events.reserve(event_id, qty).await?;
//! plan.register("release_capacity", move || async move {
//!     events.release(event_id, qty).await
//! });
//! match store.insert(row).await {
//!     Ok(()) => plan.complete(),
//!     Err(e) => {
//!         plan.compensate().await;
//!         return Err(e.into());
//!     }
//! }
//! ```

use futures::future::BoxFuture;
use std::fmt::Display;
use std::future::Future;

type Step<E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), E>> + Send>;

/// Outcome of running a plan's compensating steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Steps that completed, in execution order
    pub succeeded: Vec<&'static str>,
    /// Steps that failed, with their error text
    pub failed: Vec<(&'static str, String)>,
}

impl CompensationReport {
    /// Whether every step completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered undo log for one workflow execution.
pub struct CompensationPlan<E> {
    workflow: &'static str,
    steps: Vec<(&'static str, Step<E>)>,
}

impl<E: Display + Send + 'static> CompensationPlan<E> {
    /// Start an empty plan for the named workflow.
    #[must_use]
    pub const fn new(workflow: &'static str) -> Self {
        Self {
            workflow,
            steps: Vec::new(),
        }
    }

    /// Register the reversal of a side effect that has just been committed.
    pub fn register<F, Fut>(&mut self, name: &'static str, step: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.steps.push((name, Box::new(move || Box::pin(step()))));
    }

    /// Number of registered steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Disarm the plan; registered steps are discarded without running.
    pub fn complete(mut self) {
        self.steps.clear();
    }

    /// Run every registered step, newest first.
    ///
    /// A failing step does not stop the remaining ones; each failure is logged
    /// and returned in the report.
    pub async fn compensate(mut self) -> CompensationReport {
        let mut report = CompensationReport::default();
        let workflow = self.workflow;

        while let Some((name, step)) = self.steps.pop() {
            match step().await {
                Ok(()) => {
                    tracing::info!(workflow, step = name, "Compensation step completed");
                    report.succeeded.push(name);
                }
                Err(error) => {
                    tracing::error!(
                        workflow,
                        step = name,
                        error = %error,
                        "Compensation step failed"
                    );
                    report.failed.push((name, error.to_string()));
                }
            }
        }

        report
    }
}

impl<E> Drop for CompensationPlan<E> {
    fn drop(&mut self) {
        if !self.steps.is_empty() {
            tracing::warn!(
                workflow = self.workflow,
                pending = self.steps.len(),
                "Compensation plan dropped with steps neither run nor disarmed"
            );
        }
    }
}

impl<E> std::fmt::Debug for CompensationPlan<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationPlan")
            .field("workflow", &self.workflow)
            .field(
                "steps",
                &self.steps.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn steps_run_newest_first() {
        let log = recorder();
        let mut plan = CompensationPlan::<String>::new("test");

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            plan.register(name, move || async move {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }

        let report = plan.compensate().await;
        assert!(report.is_clean());
        assert_eq!(report.succeeded, vec!["third", "second", "first"]);
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn failing_step_does_not_stop_the_rest() {
        let mut plan = CompensationPlan::<String>::new("test");
        plan.register("release", || async { Ok(()) });
        plan.register("refund", || async { Err("processor offline".to_string()) });

        let report = plan.compensate().await;
        assert!(!report.is_clean());
        assert_eq!(report.succeeded, vec!["release"]);
        assert_eq!(
            report.failed,
            vec![("refund", "processor offline".to_string())]
        );
    }

    #[tokio::test]
    async fn completed_plan_runs_nothing() {
        let log = recorder();
        let mut plan = CompensationPlan::<String>::new("test");
        let inner = Arc::clone(&log);
        plan.register("release", move || async move {
            inner.lock().unwrap().push("release");
            Ok(())
        });
        assert_eq!(plan.len(), 1);

        plan.complete();
        tokio::task::yield_now().await;
        assert!(log.lock().unwrap().is_empty());
    }
}
