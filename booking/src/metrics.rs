//! Prometheus metrics for the booking engines.
//!
//! Metrics are recorded through the `metrics` facade and are no-ops until a
//! recorder is installed. The demo binary installs one with [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use booking::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Register metric descriptions and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is already
    /// installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_business_metrics();
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }
}

/// Describe every booking metric so the exporter can emit HELP lines.
pub fn register_business_metrics() {
    describe_counter!(
        "booking_reservations_total",
        "Reservation attempts by outcome (created, replayed, or an error label)"
    );
    describe_counter!(
        "booking_capacity_rejections_total",
        "Reserve calls rejected for insufficient capacity"
    );
    describe_counter!(
        "booking_compensations_total",
        "Compensation runs by workflow and outcome"
    );
    describe_counter!(
        "booking_payments_total",
        "Capture attempts by final payment status"
    );
    describe_counter!(
        "booking_intents_expired_total",
        "Payment intents cancelled because their TTL elapsed"
    );
    describe_counter!(
        "booking_degraded_fallbacks_total",
        "Calls answered from configured defaults because a collaborator was unavailable"
    );
    describe_histogram!(
        "booking_payment_duration_seconds",
        "Time spent waiting on the payment processor"
    );
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record the outcome of a create call.
    pub fn record_outcome(status: &'static str) {
        counter!("booking_reservations_total", "status" => status).increment(1);
    }
}

/// Capacity metrics recorder.
pub struct CapacityMetrics;

impl CapacityMetrics {
    /// Record a reserve rejected for lack of seats.
    pub fn record_rejection() {
        counter!("booking_capacity_rejections_total").increment(1);
    }
}

/// Compensation metrics recorder.
pub struct CompensationMetrics;

impl CompensationMetrics {
    /// Record a compensation run.
    pub fn record(workflow: &'static str, outcome: &'static str) {
        counter!(
            "booking_compensations_total",
            "workflow" => workflow,
            "outcome" => outcome
        )
        .increment(1);
    }
}

/// Payment metrics recorder.
pub struct PaymentMetrics;

impl PaymentMetrics {
    /// Record a finished capture and how long the processor took.
    pub fn record_capture(status: &'static str, processor_time: Duration) {
        counter!("booking_payments_total", "status" => status).increment(1);
        histogram!("booking_payment_duration_seconds").record(processor_time.as_secs_f64());
    }

    /// Record intents cancelled by expiry.
    pub fn record_expired(count: u64) {
        counter!("booking_intents_expired_total").increment(count);
    }
}

/// Degraded-mode metrics recorder.
pub struct DegradedMetrics;

impl DegradedMetrics {
    /// Record a call answered from defaults.
    pub fn record_fallback(call: &'static str) {
        counter!("booking_degraded_fallbacks_total", "call" => call).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        register_business_metrics();
        ReservationMetrics::record_outcome("created");
        CapacityMetrics::record_rejection();
        CompensationMetrics::record("reservation", "completed");
        PaymentMetrics::record_capture("SUCCEEDED", Duration::from_millis(5));
        PaymentMetrics::record_expired(2);
        DegradedMetrics::record_fallback("get_event");
    }
}
