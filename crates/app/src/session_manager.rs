//! Session manager: owns every GATT session, keyed by peripheral address.
//!
//! The manager creates and destroys sessions; GATT-level state is only ever
//! changed through the session's own methods.

use std::collections::HashMap;

use gattlink_domain::id::{PeripheralAddress, SessionId};

use crate::session::GattSession;

/// Zero or more concurrent sessions, at most one per address.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<PeripheralAddress, GattSession>,
    addresses: HashMap<SessionId, PeripheralAddress>,
    prime_on_read: bool,
}

impl SessionManager {
    #[must_use]
    pub fn new(prime_on_read: bool) -> Self {
        Self {
            prime_on_read,
            ..Self::default()
        }
    }

    /// Create a session for `address` unless one already exists.
    ///
    /// Returns the new session's id, or `None` when the address already has a
    /// session (connecting or connected).
    pub fn open(&mut self, address: &PeripheralAddress) -> Option<SessionId> {
        if self.sessions.contains_key(address) {
            return None;
        }
        let session = GattSession::new(address.clone(), self.prime_on_read);
        let id = session.id();
        self.addresses.insert(id, address.clone());
        self.sessions.insert(address.clone(), session);
        Some(id)
    }

    /// Remove and return the session for `address`.
    pub fn remove(&mut self, address: &PeripheralAddress) -> Option<GattSession> {
        let session = self.sessions.remove(address)?;
        self.addresses.remove(&session.id());
        Some(session)
    }

    /// Remove and return the session with `id`.
    pub fn remove_by_id(&mut self, id: SessionId) -> Option<GattSession> {
        let address = self.addresses.remove(&id)?;
        self.sessions.remove(&address)
    }

    /// Remove every session.
    pub fn drain(&mut self) -> Vec<GattSession> {
        self.addresses.clear();
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    #[must_use]
    pub fn get(&self, address: &PeripheralAddress) -> Option<&GattSession> {
        self.sessions.get(address)
    }

    pub fn get_mut(&mut self, address: &PeripheralAddress) -> Option<&mut GattSession> {
        self.sessions.get_mut(address)
    }

    pub fn get_by_id_mut(&mut self, id: SessionId) -> Option<&mut GattSession> {
        let address = self.addresses.get(&id)?;
        self.sessions.get_mut(address)
    }

    /// Addresses with a session, in no particular order.
    #[must_use]
    pub fn addresses(&self) -> Vec<PeripheralAddress> {
        self.sessions.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
