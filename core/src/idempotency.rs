//! Client-supplied idempotency keys.
//!
//! A key is an opaque string chosen by the caller (typically a UUID sent as the
//! `Idempotency-Key` header). Retries with the same key must observe the result
//! of the first request rather than repeat its side effects.
//!
//! # Scoping
//!
//! One client key may drive more than one operation (for example creating an
//! intent and then capturing it). [`IdempotencyKey::scoped`] derives a distinct
//! key per operation so the two records never collide on a uniqueness index.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum accepted key length in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Rejected idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdempotencyKeyError {
    /// Key was empty or only whitespace
    #[error("idempotency key must not be blank")]
    Blank,

    /// Key exceeded [`MAX_KEY_LEN`]
    #[error("idempotency key is {0} bytes, maximum is {MAX_KEY_LEN}")]
    TooLong(usize),
}

/// A validated idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and wrap a raw key.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyKeyError`] when the key is blank or longer than
    /// [`MAX_KEY_LEN`].
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdempotencyKeyError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(IdempotencyKeyError::Blank);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(IdempotencyKeyError::TooLong(raw.len()));
        }
        Ok(Self(raw))
    }

    /// Derive the key used for a specific operation, e.g. `capture:<key>`.
    ///
    /// The derived key may exceed [`MAX_KEY_LEN`]; it is only ever used as a
    /// storage key, never re-parsed.
    #[must_use]
    pub fn scoped(&self, operation: &str) -> String {
        format!("{operation}:{}", self.0)
    }

    /// Borrow the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = IdempotencyKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
