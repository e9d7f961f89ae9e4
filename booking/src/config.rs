//! Configuration management for the booking engines.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Call [`Config::validate`] after loading; the engines assume a valid config.

use crate::types::Money;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value is outside its allowed range
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid {
        /// Environment variable or field name
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reservation engine settings
    pub reservations: ReservationConfig,
    /// Payment engine settings
    pub payments: PaymentConfig,
    /// Simulated processor settings
    pub processor: ProcessorConfig,
    /// Remote capability settings
    pub capabilities: CapabilityConfig,
    /// Background sweeper settings
    pub sweeper: SweeperConfig,
    /// Database settings (postgres feature)
    pub database: DatabaseConfig,
    /// Prometheus exporter settings
    pub metrics: MetricsConfig,
}

/// Reservation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// Most tickets one user may hold for one event across active reservations
    pub max_tickets_per_user_per_event: u32,
    /// What to do when the catalog cannot be reached
    pub degraded_mode: DegradedMode,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            max_tickets_per_user_per_event: 4,
            degraded_mode: DegradedMode::Strict,
        }
    }
}

/// Behaviour when `GetEvent` is unavailable.
///
/// Never applies to `Reserve`, `Release`, or `ConfirmReservation`: those
/// always fail on an unavailable collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DegradedMode {
    /// Fail the reservation
    Strict,
    /// Assume the event is published at this unit price, log and count it
    CatalogDefaults {
        /// Price used in place of the catalog price
        unit_price: Money,
    },
}

/// Payment engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Lifetime of a payment intent in seconds
    pub intent_ttl_secs: u64,
    /// What happens to the reservation when a charge is declined
    pub capture_failure_policy: CaptureFailurePolicy,
    /// Maximum intents cancelled per sweep run
    pub sweep_batch_size: usize,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            intent_ttl_secs: 24 * 60 * 60,
            capture_failure_policy: CaptureFailurePolicy::KeepReservation,
            sweep_batch_size: 500,
        }
    }
}

impl PaymentConfig {
    /// Intent lifetime as a `chrono` duration
    #[must_use]
    pub fn intent_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.intent_ttl_secs).unwrap_or(i64::MAX))
    }
}

/// Reservation handling after a declined capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureFailurePolicy {
    /// Leave the reservation PENDING so the customer can retry with a new intent
    #[default]
    KeepReservation,
    /// Cancel the reservation, releasing its capacity
    CancelReservation,
}

impl FromStr for CaptureFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep-reservation" => Ok(Self::KeepReservation),
            "cancel" | "cancel-reservation" => Ok(Self::CancelReservation),
            other => Err(ConfigError::Invalid {
                key: "PAYMENT_CAPTURE_FAILURE_POLICY",
                reason: format!("unknown policy '{other}', expected 'keep' or 'cancel'"),
            }),
        }
    }
}

/// Simulated processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Probability that a charge is approved, in `[0, 1]`
    pub success_rate: f64,
    /// Lower bound of simulated latency in milliseconds
    pub min_latency_ms: u64,
    /// Upper bound of simulated latency in milliseconds
    pub max_latency_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            success_rate: 0.95,
            min_latency_ms: 1000,
            max_latency_ms: 3000,
        }
    }
}

/// Remote capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Base URL of the event service; in-process ledger when absent
    pub event_service_url: Option<String>,
    /// Base URL of the reservation service; in-process engine when absent
    pub reservation_service_url: Option<String>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries for idempotent calls on transient failures
    pub max_retries: u32,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            event_service_url: None,
            reservation_service_url: None,
            timeout_ms: 2000,
            max_retries: 3,
        }
    }
}

impl CapabilityConfig {
    /// Per-request timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Background sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl SweeperConfig {
    /// Sweep period
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; in-memory stores when absent
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults; an unknown policy name
    /// is logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let degraded_mode = match env::var("BOOKING_DEGRADED_MODE").as_deref() {
            Ok("catalog-defaults") => DegradedMode::CatalogDefaults {
                unit_price: Money::from_cents(env_parse("BOOKING_DEFAULT_UNIT_PRICE_CENTS", 2999)),
            },
            Ok("strict") | Err(_) => DegradedMode::Strict,
            Ok(other) => {
                tracing::warn!(value = other, "Unknown BOOKING_DEGRADED_MODE, using strict");
                DegradedMode::Strict
            }
        };

        let capture_failure_policy = match env::var("PAYMENT_CAPTURE_FAILURE_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|err: ConfigError| {
                tracing::warn!(error = %err, "Ignoring capture failure policy");
                CaptureFailurePolicy::default()
            }),
            Err(_) => CaptureFailurePolicy::default(),
        };

        Self {
            reservations: ReservationConfig {
                max_tickets_per_user_per_event: env_parse(
                    "RESERVATION_MAX_TICKETS_PER_USER_PER_EVENT",
                    defaults.reservations.max_tickets_per_user_per_event,
                ),
                degraded_mode,
            },
            payments: PaymentConfig {
                intent_ttl_secs: env_parse(
                    "PAYMENT_INTENT_TTL_SECS",
                    defaults.payments.intent_ttl_secs,
                ),
                capture_failure_policy,
                sweep_batch_size: env_parse(
                    "PAYMENT_SWEEP_BATCH_SIZE",
                    defaults.payments.sweep_batch_size,
                ),
            },
            processor: ProcessorConfig {
                success_rate: env_parse("PAYMENT_SUCCESS_RATE", defaults.processor.success_rate),
                min_latency_ms: env_parse(
                    "PAYMENT_MIN_LATENCY_MS",
                    defaults.processor.min_latency_ms,
                ),
                max_latency_ms: env_parse(
                    "PAYMENT_MAX_LATENCY_MS",
                    defaults.processor.max_latency_ms,
                ),
            },
            capabilities: CapabilityConfig {
                event_service_url: env::var("EVENT_SERVICE_URL").ok(),
                reservation_service_url: env::var("RESERVATION_SERVICE_URL").ok(),
                timeout_ms: env_parse("CAPABILITY_TIMEOUT_MS", defaults.capabilities.timeout_ms),
                max_retries: env_parse("CAPABILITY_MAX_RETRIES", defaults.capabilities.max_retries),
            },
            sweeper: SweeperConfig {
                interval_secs: env_parse("SWEEP_INTERVAL_SECS", defaults.sweeper.interval_secs),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            metrics: MetricsConfig {
                host: env::var("METRICS_HOST").unwrap_or(defaults.metrics.host),
                port: env_parse("METRICS_PORT", defaults.metrics.port),
            },
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reservations.max_tickets_per_user_per_event == 0 {
            return Err(ConfigError::Invalid {
                key: "RESERVATION_MAX_TICKETS_PER_USER_PER_EVENT",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.payments.intent_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "PAYMENT_INTENT_TTL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.processor.success_rate) {
            return Err(ConfigError::Invalid {
                key: "PAYMENT_SUCCESS_RATE",
                reason: format!("{} is outside [0, 1]", self.processor.success_rate),
            });
        }
        if self.processor.min_latency_ms > self.processor.max_latency_ms {
            return Err(ConfigError::Invalid {
                key: "PAYMENT_MIN_LATENCY_MS",
                reason: "must not exceed PAYMENT_MAX_LATENCY_MS".to_string(),
            });
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SWEEP_INTERVAL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.payments.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "PAYMENT_SWEEP_BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reservations.max_tickets_per_user_per_event, 4);
        assert_eq!(config.payments.intent_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.reservations.degraded_mode, DegradedMode::Strict);
        assert_eq!(
            config.payments.capture_failure_policy,
            CaptureFailurePolicy::KeepReservation
        );
    }

    #[test]
    fn out_of_range_success_rate_rejected() {
        let mut config = Config::default();
        config.processor.success_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "PAYMENT_SUCCESS_RATE", .. })
        ));
    }

    #[test]
    fn inverted_latency_bounds_rejected() {
        let mut config = Config::default();
        config.processor.min_latency_ms = 10;
        config.processor.max_latency_ms = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_quota_rejected() {
        let mut config = Config::default();
        config.reservations.max_tickets_per_user_per_event = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn capture_policy_parses() {
        assert_eq!(
            "cancel".parse::<CaptureFailurePolicy>(),
            Ok(CaptureFailurePolicy::CancelReservation)
        );
        assert_eq!(
            " Keep ".parse::<CaptureFailurePolicy>(),
            Ok(CaptureFailurePolicy::KeepReservation)
        );
        assert!("refund".parse::<CaptureFailurePolicy>().is_err());
    }
}
