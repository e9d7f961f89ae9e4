//! HTTP capability clients for the event and reservation services.
//!
//! Status mapping is the same for every call:
//!
//! | Response                        | Error          |
//! |---------------------------------|----------------|
//! | transport failure, timeout, 5xx | `Unavailable`  |
//! | 404                             | `NotFound`     |
//! | 409                             | `InvalidState` |
//! | other 4xx                       | `Validation`   |
//!
//! Only reads are retried. A write whose response was lost may or may not have
//! happened, and repeating it could hold or return seats twice.

use super::{EventCapability, ReservationCapability};
use crate::config::CapabilityConfig;
use crate::error::{BookingError, Result};
use crate::types::{
    EventId, EventInfo, EventStatus, Money, Reservation, ReservationId, ReservationItem,
    ReservationStatus, UserId,
};
use async_trait::async_trait;
use booking_core::retry::{RetryPolicy, retry_with_backoff};
use chrono::NaiveDateTime;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

// ============================================================================
// Shared plumbing
// ============================================================================

#[derive(Clone)]
struct ServiceClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ServiceClient {
    fn new(base_url: &str, config: &CapabilityConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BookingError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::builder()
                .max_retries(config.max_retries)
                .build(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        entity: &'static str,
        id: &str,
    ) -> Result<T> {
        let url = self.url(path);
        let url = url.as_str();
        let client = &self.client;
        retry_with_backoff(
            &self.retry,
            move || async move {
                let response = client.get(url).send().await.map_err(transport)?;
                let response = check_status(response, entity, id).await?;
                decode(response).await
            },
            BookingError::is_retryable,
        )
        .await
    }

    async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
        entity: &'static str,
        id: &str,
    ) -> Result<Response> {
        let response = self
            .client
            .post(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        check_status(response, entity, id).await
    }
}

fn transport(err: reqwest::Error) -> BookingError {
    if err.is_timeout() {
        BookingError::Unavailable(format!("Request timed out: {err}"))
    } else {
        BookingError::Unavailable(format!("Request failed: {err}"))
    }
}

async fn check_status(response: Response, entity: &'static str, id: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => BookingError::not_found(entity, id),
        StatusCode::CONFLICT => BookingError::InvalidState(body),
        s if s.is_server_error() => {
            BookingError::Unavailable(format!("{entity} service returned {s}: {body}"))
        }
        s => BookingError::Validation(format!("{entity} service returned {s}: {body}")),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| BookingError::Unavailable(format!("Unreadable response: {e}")))
}

/// Prices travel as decimal currency units.
fn money_from_decimal(value: f64) -> Result<Money> {
    let cents = (value * 100.0).round();
    if !cents.is_finite() || cents < 0.0 || cents > 9.0e15 {
        return Err(BookingError::Validation(format!("Bad price on the wire: {value}")));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // range checked above
    Ok(Money::from_cents(cents as u64))
}

// ============================================================================
// Event service
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDto {
    status: String,
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityDto {
    available_capacity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveDto {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn event_status(raw: &str) -> Result<EventStatus> {
    match raw {
        "DRAFT" => Ok(EventStatus::Draft),
        "PUBLISHED" => Ok(EventStatus::Published),
        "COMPLETED" => Ok(EventStatus::Completed),
        "CANCELLED" => Ok(EventStatus::Cancelled),
        other => Err(BookingError::Unavailable(format!("Unknown event status: {other}"))),
    }
}

/// [`EventCapability`] over the event service's REST API
#[derive(Clone)]
pub struct HttpEventCapability {
    service: ServiceClient,
}

impl HttpEventCapability {
    /// Client for the event service at `base_url`.
    ///
    /// # Errors
    ///
    /// `Internal` if the HTTP client cannot be built.
    pub fn new(base_url: &str, config: &CapabilityConfig) -> Result<Self> {
        Ok(Self {
            service: ServiceClient::new(base_url, config)?,
        })
    }
}

#[async_trait]
impl EventCapability for HttpEventCapability {
    async fn get_event(&self, event_id: EventId) -> Result<EventInfo> {
        let dto: EventDto = self
            .service
            .get_json(&format!("/events/{event_id}"), "event", &event_id.to_string())
            .await?;
        Ok(EventInfo {
            event_id,
            status: event_status(&dto.status)?,
            unit_price: money_from_decimal(dto.price)?,
        })
    }

    async fn get_availability(&self, event_id: EventId) -> Result<u32> {
        let dto: AvailabilityDto = self
            .service
            .get_json(
                &format!("/events/{event_id}/availability"),
                "event",
                &event_id.to_string(),
            )
            .await?;
        Ok(dto.available_capacity)
    }

    async fn reserve(&self, event_id: EventId, quantity: u32) -> Result<()> {
        let response = self
            .service
            .post(
                &format!("/events/{event_id}/reserve"),
                &[("quantity", quantity.to_string())],
                "event",
                &event_id.to_string(),
            )
            .await?;
        let dto: ReserveDto = decode(response).await?;
        if dto.success {
            return Ok(());
        }
        tracing::warn!(
            event_id = %event_id,
            quantity,
            message = dto.message.as_deref().unwrap_or_default(),
            "Event service refused reserve"
        );
        Err(BookingError::InsufficientCapacity {
            event_id: event_id.get(),
            requested: quantity,
            available: 0,
        })
    }

    async fn release(&self, event_id: EventId, quantity: u32) -> Result<()> {
        self.service
            .post(
                &format!("/events/{event_id}/release"),
                &[("quantity", quantity.to_string())],
                "event",
                &event_id.to_string(),
            )
            .await?;
        Ok(())
    }
}

// ============================================================================
// Reservation service
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservationItemDto {
    ticket_type: String,
    quantity: u32,
    unit_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservationDto {
    reservation_id: String,
    user_id: u64,
    event_id: u64,
    quantity: u32,
    total_price: f64,
    status: String,
    #[serde(default)]
    idempotency_key: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    #[serde(default)]
    items: Vec<ReservationItemDto>,
}

impl TryFrom<ReservationDto> for Reservation {
    type Error = BookingError;

    fn try_from(dto: ReservationDto) -> Result<Self> {
        let id = ReservationId::parse(&dto.reservation_id).ok_or_else(|| {
            BookingError::Unavailable(format!("Malformed reservation id: {}", dto.reservation_id))
        })?;
        let status = ReservationStatus::from_str_opt(&dto.status).ok_or_else(|| {
            BookingError::Unavailable(format!("Unknown reservation status: {}", dto.status))
        })?;
        let items = dto
            .items
            .into_iter()
            .map(|item| {
                Ok(ReservationItem {
                    ticket_type: item.ticket_type,
                    quantity: item.quantity,
                    unit_price: money_from_decimal(item.unit_price)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            user_id: UserId::new(dto.user_id),
            event_id: EventId::new(dto.event_id),
            quantity: dto.quantity,
            total_price: money_from_decimal(dto.total_price)?,
            status,
            idempotency_key: dto.idempotency_key,
            items,
            created_at: dto.created_at.and_utc(),
            updated_at: dto.updated_at.and_utc(),
        })
    }
}

/// [`ReservationCapability`] over the reservation service's REST API
#[derive(Clone)]
pub struct HttpReservationCapability {
    service: ServiceClient,
}

impl HttpReservationCapability {
    /// Client for the reservation service at `base_url`.
    ///
    /// # Errors
    ///
    /// `Internal` if the HTTP client cannot be built.
    pub fn new(base_url: &str, config: &CapabilityConfig) -> Result<Self> {
        Ok(Self {
            service: ServiceClient::new(base_url, config)?,
        })
    }

    async fn transition(&self, id: &ReservationId, verb: &str) -> Result<Reservation> {
        let response = self
            .service
            .post(&format!("/reservations/{id}/{verb}"), &[], "reservation", id.as_str())
            .await?;
        let dto: ReservationDto = decode(response).await?;
        dto.try_into()
    }
}

#[async_trait]
impl ReservationCapability for HttpReservationCapability {
    async fn get_reservation(&self, id: &ReservationId) -> Result<Reservation> {
        let dto: ReservationDto = self
            .service
            .get_json(&format!("/reservations/{id}"), "reservation", id.as_str())
            .await?;
        dto.try_into()
    }

    async fn confirm_reservation(&self, id: &ReservationId) -> Result<Reservation> {
        self.transition(id, "confirm").await
    }

    async fn cancel_reservation(&self, id: &ReservationId) -> Result<Reservation> {
        self.transition(id, "cancel").await
    }
}
