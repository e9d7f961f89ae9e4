//! Event capability that can be switched off per call.

use crate::capabilities::EventCapability;
use crate::error::{BookingError, Result};
use crate::types::{EventId, EventInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One of the [`EventCapability`] calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCall {
    /// `get_event`
    GetEvent,
    /// `get_availability`
    GetAvailability,
    /// `reserve`
    Reserve,
    /// `release`
    Release,
}

#[derive(Debug, Default, Clone, Copy)]
struct CallState {
    failing: bool,
    calls: usize,
}

/// Wraps an [`EventCapability`]; calls switched off with [`Self::fail`]
/// return `Unavailable` without reaching the inner capability.
pub struct FlakyEventCapability {
    inner: Arc<dyn EventCapability>,
    calls: Mutex<HashMap<EventCall, CallState>>,
}

impl FlakyEventCapability {
    /// Pass-through wrapper around `inner`
    #[must_use]
    pub fn new(inner: Arc<dyn EventCapability>) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Make `call` report `Unavailable` until [`Self::recover`]
    pub fn fail(&self, call: EventCall) {
        self.with_state(call, |state| state.failing = true);
    }

    /// Let `call` through again
    pub fn recover(&self, call: EventCall) {
        self.with_state(call, |state| state.failing = false);
    }

    /// How often `call` was made, failed or not
    #[must_use]
    pub fn calls(&self, call: EventCall) -> usize {
        self.with_state(call, |state| state.calls)
    }

    fn with_state<T>(&self, call: EventCall, f: impl FnOnce(&mut CallState) -> T) -> T {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        f(calls.entry(call).or_default())
    }

    fn enter(&self, call: EventCall) -> Result<()> {
        let failing = self.with_state(call, |state| {
            state.calls += 1;
            state.failing
        });
        if failing {
            return Err(BookingError::Unavailable(format!(
                "event service {call:?} unavailable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EventCapability for FlakyEventCapability {
    async fn get_event(&self, event_id: EventId) -> Result<EventInfo> {
        self.enter(EventCall::GetEvent)?;
        self.inner.get_event(event_id).await
    }

    async fn get_availability(&self, event_id: EventId) -> Result<u32> {
        self.enter(EventCall::GetAvailability)?;
        self.inner.get_availability(event_id).await
    }

    async fn reserve(&self, event_id: EventId, quantity: u32) -> Result<()> {
        self.enter(EventCall::Reserve)?;
        self.inner.reserve(event_id, quantity).await
    }

    async fn release(&self, event_id: EventId, quantity: u32) -> Result<()> {
        self.enter(EventCall::Release)?;
        self.inner.release(event_id, quantity).await
    }
}
