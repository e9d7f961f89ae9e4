//! Background maintenance for the payment engine.
//!
//! On every tick the sweeper cancels stale intents and retries reservation
//! confirmations for charged payments. It stops when the shutdown channel
//! fires or its sender is dropped.

use crate::engines::PaymentEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Totals from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Intents cancelled past their expiry
    pub expired: usize,
    /// Payments whose reservation confirmation was recorded
    pub reconciled: usize,
}

/// Periodic payment maintenance task
pub struct Sweeper {
    payments: Arc<PaymentEngine>,
    interval: Duration,
}

impl Sweeper {
    /// Sweeper running every `interval`
    #[must_use]
    pub const fn new(payments: Arc<PaymentEngine>, interval: Duration) -> Self {
        Self { payments, interval }
    }

    /// Run one sweep now.
    ///
    /// A failing step is logged and counted as zero; the other still runs.
    pub async fn sweep_once(&self) -> SweepReport {
        let expired = self
            .payments
            .expire_stale_intents()
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Intent expiry sweep failed");
                0
            });
        let reconciled = self
            .payments
            .reconcile_confirmations()
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Confirmation reconciliation failed");
                0
            });
        SweepReport {
            expired,
            reconciled,
        }
    }

    /// Sweep on every tick until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    if report != SweepReport::default() {
                        info!(
                            expired = report.expired,
                            reconciled = report.reconciled,
                            "Sweep finished"
                        );
                    }
                }
            }
        }

        info!("Sweeper stopped");
    }

    /// Spawn [`Self::run`] on the current runtime
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
