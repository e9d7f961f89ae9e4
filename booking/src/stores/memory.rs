//! In-memory stores.
//!
//! Records live in an arena: a map from key to `Arc<Mutex<record>>`. The map's
//! `RwLock` is held only long enough to find or insert a handle; mutations lock
//! the record's own mutex, so two events (or two reservations) never contend.

use super::{CapacityStore, Mutation, PaymentStore, ReservationStore};
use crate::aggregates::PaymentState;
use crate::error::{BookingError, StoreError};
use crate::types::{
    ConfirmationStatus, EventCapacity, EventId, IntentId, Payment, PaymentId, PaymentIntent,
    PaymentStatus, Reservation, ReservationId, ReservationStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

// ============================================================================
// Arena
// ============================================================================

/// Key-scoped exclusive access to cloneable records
#[derive(Debug)]
struct Arena<K, V> {
    records: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> Arena<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send,
{
    fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert unless the key is taken; returns whether it was inserted
    async fn insert(&self, key: K, value: V) -> bool {
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return false;
        }
        records.insert(key, Arc::new(Mutex::new(value)));
        true
    }

    async fn handle(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.records.read().await.get(key).cloned()
    }

    async fn snapshot(&self, key: &K) -> Option<V> {
        let handle = self.handle(key).await?;
        let value = handle.lock().await.clone();
        Some(value)
    }

    async fn snapshots(&self) -> Vec<V> {
        let handles: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut values = Vec::with_capacity(handles.len());
        for handle in handles {
            values.push(handle.lock().await.clone());
        }
        values
    }

    /// Run `mutation` on a copy under the record lock; commit on success.
    ///
    /// `None` when the key is unknown.
    async fn update(
        &self,
        key: &K,
        mutation: Mutation<'_, V>,
    ) -> Option<Result<V, BookingError>> {
        let handle = self.handle(key).await?;
        let mut guard = handle.lock().await;
        let mut candidate = guard.clone();
        Some(mutation(&mut candidate).map(|()| {
            *guard = candidate.clone();
            candidate
        }))
    }
}

// ============================================================================
// Capacity
// ============================================================================

/// In-memory [`CapacityStore`]
#[derive(Debug)]
pub struct InMemoryCapacityStore {
    events: Arena<EventId, EventCapacity>,
}

impl InMemoryCapacityStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Arena::new(),
        }
    }
}

impl Default for InMemoryCapacityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapacityStore for InMemoryCapacityStore {
    async fn insert(&self, capacity: EventCapacity) -> Result<(), StoreError> {
        let event_id = capacity.event_id;
        if self.events.insert(event_id, capacity).await {
            Ok(())
        } else {
            Err(StoreError::DuplicateKey(format!("event capacity {event_id}")))
        }
    }

    async fn get(&self, event_id: EventId) -> Result<Option<EventCapacity>, StoreError> {
        Ok(self.events.snapshot(&event_id).await)
    }

    async fn update(
        &self,
        event_id: EventId,
        mutation: Mutation<'_, EventCapacity>,
    ) -> Result<EventCapacity, BookingError> {
        self.events
            .update(&event_id, mutation)
            .await
            .unwrap_or_else(|| Err(BookingError::not_found("event capacity", event_id)))
    }
}

// ============================================================================
// Reservations
// ============================================================================

#[derive(Debug, Default)]
struct ReservationIndexes {
    by_key: HashMap<String, ReservationId>,
    by_owner: HashMap<(UserId, EventId), Vec<ReservationId>>,
}

/// In-memory [`ReservationStore`]
#[derive(Debug)]
pub struct InMemoryReservationStore {
    rows: Arena<ReservationId, Reservation>,
    /// Held for writing across an insert, which serializes quota checks
    indexes: RwLock<ReservationIndexes>,
}

impl InMemoryReservationStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Arena::new(),
            indexes: RwLock::new(ReservationIndexes::default()),
        }
    }

    async fn held(&self, ids: &[ReservationId]) -> u32 {
        let mut held: u32 = 0;
        for id in ids {
            if let Some(row) = self.rows.snapshot(id).await {
                if row.status.is_active() {
                    held = held.saturating_add(row.quantity);
                }
            }
        }
        held
    }
}

impl Default for InMemoryReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: Reservation, max_active: u32) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().await;

        if let Some(key) = &reservation.idempotency_key {
            if indexes.by_key.contains_key(key) {
                return Err(StoreError::DuplicateKey(format!("idempotency key {key}")));
            }
        }

        let owner = (reservation.user_id, reservation.event_id);
        let held = match indexes.by_owner.get(&owner) {
            Some(ids) => self.held(ids).await,
            None => 0,
        };
        if held.saturating_add(reservation.quantity) > max_active {
            return Err(StoreError::QuotaExceeded {
                held,
                requested: reservation.quantity,
                max: max_active,
            });
        }

        let id = reservation.id.clone();
        let key = reservation.idempotency_key.clone();
        if !self.rows.insert(id.clone(), reservation).await {
            return Err(StoreError::DuplicateKey(format!("reservation {id}")));
        }
        if let Some(key) = key {
            indexes.by_key.insert(key, id.clone());
        }
        indexes.by_owner.entry(owner).or_default().push(id);
        Ok(())
    }

    async fn get(&self, id: &ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.rows.snapshot(id).await)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Reservation>, StoreError> {
        let id = self.indexes.read().await.by_key.get(key).cloned();
        match id {
            Some(id) => Ok(self.rows.snapshot(&id).await),
            None => Ok(None),
        }
    }

    async fn active_quantity(&self, user_id: UserId, event_id: EventId) -> Result<u32, StoreError> {
        let ids = self
            .indexes
            .read()
            .await
            .by_owner
            .get(&(user_id, event_id))
            .cloned()
            .unwrap_or_default();
        Ok(self.held(&ids).await)
    }

    async fn update(
        &self,
        id: &ReservationId,
        mutation: Mutation<'_, Reservation>,
    ) -> Result<Reservation, BookingError> {
        self.rows
            .update(id, mutation)
            .await
            .unwrap_or_else(|| Err(BookingError::not_found("reservation", id)))
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>, StoreError> {
        let mut rows: Vec<_> = self
            .rows
            .snapshots()
            .await
            .into_iter()
            .filter(|row| row.user_id == user_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list_by_status(
        &self,
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut rows: Vec<_> = self
            .rows
            .snapshots()
            .await
            .into_iter()
            .filter(|row| row.status == status)
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Default)]
struct PaymentTables {
    payments: HashMap<PaymentId, Payment>,
    latest: HashMap<IntentId, PaymentId>,
    capture_keys: HashMap<String, PaymentId>,
}

/// In-memory [`PaymentStore`]
#[derive(Debug)]
pub struct InMemoryPaymentStore {
    intents: Arena<IntentId, PaymentIntent>,
    intent_keys: RwLock<HashMap<String, IntentId>>,
    /// Always locked after an intent row, never before
    tables: RwLock<PaymentTables>,
}

impl InMemoryPaymentStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            intents: Arena::new(),
            intent_keys: RwLock::new(HashMap::new()),
            tables: RwLock::new(PaymentTables::default()),
        }
    }
}

impl Default for InMemoryPaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_intent(&self, intent: PaymentIntent) -> Result<(), StoreError> {
        let mut keys = self.intent_keys.write().await;
        if let Some(key) = &intent.idempotency_key {
            if keys.contains_key(key) {
                return Err(StoreError::DuplicateKey(format!("idempotency key {key}")));
            }
        }

        let id = intent.id.clone();
        let key = intent.idempotency_key.clone();
        if !self.intents.insert(id.clone(), intent).await {
            return Err(StoreError::DuplicateKey(format!("payment intent {id}")));
        }
        if let Some(key) = key {
            keys.insert(key, id);
        }
        Ok(())
    }

    async fn get_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self.intents.snapshot(id).await)
    }

    async fn find_intent_by_key(&self, key: &str) -> Result<Option<PaymentIntent>, StoreError> {
        let id = self.intent_keys.read().await.get(key).cloned();
        match id {
            Some(id) => Ok(self.intents.snapshot(&id).await),
            None => Ok(None),
        }
    }

    async fn update_intent(
        &self,
        id: &IntentId,
        mutation: Mutation<'_, PaymentState>,
    ) -> Result<PaymentState, BookingError> {
        let handle = self
            .intents
            .handle(id)
            .await
            .ok_or_else(|| BookingError::not_found("payment intent", id))?;
        let mut intent = handle.lock().await;

        let mut tables = self.tables.write().await;
        let payment = tables
            .latest
            .get(id)
            .and_then(|payment_id| tables.payments.get(payment_id))
            .cloned();
        let mut state = PaymentState {
            intent: Some(intent.clone()),
            payment,
        };

        mutation(&mut state)?;

        let updated_intent = state
            .intent
            .clone()
            .ok_or_else(|| BookingError::Internal("Mutation removed the intent".to_string()))?;

        if let Some(payment) = &state.payment {
            let is_new = !tables.payments.contains_key(&payment.id);
            if is_new {
                if let Some(key) = &payment.capture_key {
                    if tables.capture_keys.contains_key(key) {
                        return Err(BookingError::InvalidState(format!(
                            "Duplicate key: capture key {key} already used"
                        )));
                    }
                    tables.capture_keys.insert(key.clone(), payment.id.clone());
                }
                tables.latest.insert(id.clone(), payment.id.clone());
            }
            tables.payments.insert(payment.id.clone(), payment.clone());
        }

        *intent = updated_intent;
        Ok(state)
    }

    async fn get_payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.read().await.payments.get(id).cloned())
    }

    async fn find_payment_by_capture_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .capture_keys
            .get(key)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn list_intents_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let mut intents: Vec<_> = self
            .intents
            .snapshots()
            .await
            .into_iter()
            .filter(|intent| intent.user_id == user_id)
            .collect();
        intents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(intents)
    }

    async fn list_payments_by_user(&self, user_id: UserId) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<_> = self
            .tables
            .read()
            .await
            .payments
            .values()
            .filter(|payment| payment.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn expired_intents(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IntentId>, StoreError> {
        let mut stale: Vec<_> = self
            .intents
            .snapshots()
            .await
            .into_iter()
            .filter(|intent| intent.status.is_sweepable() && intent.expires_at < now)
            .collect();
        stale.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(stale.into_iter().take(limit).map(|intent| intent.id).collect())
    }

    async fn awaiting_confirmation(&self, limit: usize) -> Result<Vec<Payment>, StoreError> {
        let mut pending: Vec<_> = self
            .tables
            .read()
            .await
            .payments
            .values()
            .filter(|payment| {
                payment.status == PaymentStatus::Succeeded
                    && payment.confirmation == ConfirmationStatus::Pending
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit);
        Ok(pending)
    }
}
