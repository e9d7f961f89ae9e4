//! In-process event catalog: status and ticket price per event.

use crate::types::{EventId, EventInfo, EventStatus, Money};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Event metadata the reservation engine prices against
#[derive(Debug, Default)]
pub struct InMemoryEventCatalog {
    events: RwLock<HashMap<EventId, EventInfo>>,
}

impl InMemoryEventCatalog {
    /// Empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an event
    pub async fn upsert(&self, event_id: EventId, status: EventStatus, unit_price: Money) {
        self.events.write().await.insert(
            event_id,
            EventInfo {
                event_id,
                status,
                unit_price,
            },
        );
    }

    /// Change an event's status; returns `false` for an unknown event
    pub async fn set_status(&self, event_id: EventId, status: EventStatus) -> bool {
        match self.events.write().await.get_mut(&event_id) {
            Some(info) => {
                info.status = status;
                true
            }
            None => false,
        }
    }

    /// Look up an event
    pub async fn get(&self, event_id: EventId) -> Option<EventInfo> {
        self.events.read().await.get(&event_id).cloned()
    }
}
