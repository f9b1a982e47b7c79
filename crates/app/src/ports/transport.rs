//! Transport port: the platform BLE capability.
//!
//! Every method only *initiates* work and returns immediately. Results come
//! back through the handle passed in: a [`Completion`] fires exactly once,
//! a [`SightingSink`] or [`LinkSink`] for as long as the scan or link lives.
//! Implementations may invoke those handles from any thread; the engine
//! marshals everything onto its dispatcher before touching state.

use gattlink_domain::error::TransportError;
use gattlink_domain::gatt::{CharacteristicRef, DescriptorRef, GattService};
use gattlink_domain::id::{PeripheralAddress, SessionId};

pub use crate::mailbox::{Completion, LinkSink, SightingSink};

/// One advertisement observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub address: PeripheralAddress,
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub signal_strength: i16,
}

/// Link-level notification for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link is established.
    Connected,
    /// The link dropped or was closed.
    Disconnected,
    /// The connection attempt failed before the link came up.
    ConnectFailed(TransportError),
    /// The peripheral pushed a new value (notification or indication).
    ValueChanged {
        characteristic: CharacteristicRef,
        value: Vec<u8>,
    },
}

/// Platform BLE transport.
///
/// Implementations live in adapter crates (e.g. `gattlink-adapter-btleplug`).
pub trait Transport: Send + Sync + 'static {
    /// Start a continuous scan, reporting every advertisement to `sink`.
    fn start_scan(&self, sink: SightingSink);

    /// Cancel the running scan, if any.
    fn stop_scan(&self);

    /// Open a link to `address` for `session`, reporting link events to `link`.
    fn connect(&self, session: SessionId, address: &PeripheralAddress, link: LinkSink);

    /// Close the link to `address`.
    fn disconnect(&self, address: &PeripheralAddress);

    /// Discover the primary services and characteristics of the session's peripheral.
    fn discover_services(&self, session: SessionId, done: Completion<Vec<GattService>>);

    /// Read the current value of a characteristic.
    fn read_characteristic(
        &self,
        session: SessionId,
        characteristic: CharacteristicRef,
        done: Completion<Vec<u8>>,
    );

    /// Write a characteristic value (with response).
    fn write_characteristic(
        &self,
        session: SessionId,
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        done: Completion<()>,
    );

    /// Write a descriptor value.
    fn write_descriptor(
        &self,
        session: SessionId,
        descriptor: DescriptorRef,
        value: Vec<u8>,
        done: Completion<()>,
    );

    /// Read the signal strength of the connected peripheral.
    fn read_signal_strength(&self, session: SessionId, done: Completion<i16>);
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn start_scan(&self, sink: SightingSink) {
        (**self).start_scan(sink);
    }

    fn stop_scan(&self) {
        (**self).stop_scan();
    }

    fn connect(&self, session: SessionId, address: &PeripheralAddress, link: LinkSink) {
        (**self).connect(session, address, link);
    }

    fn disconnect(&self, address: &PeripheralAddress) {
        (**self).disconnect(address);
    }

    fn discover_services(&self, session: SessionId, done: Completion<Vec<GattService>>) {
        (**self).discover_services(session, done);
    }

    fn read_characteristic(
        &self,
        session: SessionId,
        characteristic: CharacteristicRef,
        done: Completion<Vec<u8>>,
    ) {
        (**self).read_characteristic(session, characteristic, done);
    }

    fn write_characteristic(
        &self,
        session: SessionId,
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        done: Completion<()>,
    ) {
        (**self).write_characteristic(session, characteristic, value, done);
    }

    fn write_descriptor(
        &self,
        session: SessionId,
        descriptor: DescriptorRef,
        value: Vec<u8>,
        done: Completion<()>,
    ) {
        (**self).write_descriptor(session, descriptor, value, done);
    }

    fn read_signal_strength(&self, session: SessionId, done: Completion<i16>) {
        (**self).read_signal_strength(session, done);
    }
}
