//! Typed identifiers: UUID-backed session ids and opaque peripheral addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one GATT session.
///
/// A fresh id is minted on every connect, so completions addressed to a
/// torn-down session can never be mistaken for the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Mint a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 hex digits
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Opaque, stable identifier of a peripheral (usually its MAC address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Wrap a platform address string.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeripheralAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}
