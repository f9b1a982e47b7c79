//! Events: notifications delivered to the host through the event sink.
//!
//! Read completions and unsolicited change notifications share one decode
//! path and differ only in the event variant: [`Event::ValueRead`] is
//! caller-initiated, [`Event::ValueChanged`] is peripheral-initiated.

use std::fmt;

use crate::codec::value::{DecodedValue, ValueKind};
use crate::error::GattError;
use crate::gatt::CharacteristicRef;
use crate::id::PeripheralAddress;
use crate::peripheral::Peripheral;

/// A state change or value reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// First sighting of a peripheral since the scan started.
    DeviceFound { peripheral: Peripheral },
    /// Any sighting, or a signal strength read on a connected peripheral.
    SignalStrengthChanged {
        address: PeripheralAddress,
        signal_strength: i16,
    },
    /// Link established; service discovery is under way.
    Connected { address: PeripheralAddress },
    /// Discovery finished; characteristic operations are now accepted.
    ServicesDiscovered {
        address: PeripheralAddress,
        service_count: usize,
    },
    /// Decoded result of a caller-initiated read.
    ValueRead {
        address: PeripheralAddress,
        characteristic: CharacteristicRef,
        value: DecodedValue,
    },
    /// Decoded value pushed by the peripheral.
    ValueChanged {
        address: PeripheralAddress,
        characteristic: CharacteristicRef,
        value: DecodedValue,
    },
    /// A write completed. No payload is echoed.
    ValueWritten {
        address: PeripheralAddress,
        characteristic: CharacteristicRef,
    },
    /// The session was torn down.
    Disconnected { address: PeripheralAddress },
    /// Asynchronously detected failure of one operation.
    Failure {
        address: Option<PeripheralAddress>,
        operation: Operation,
        error: GattError,
    },
}

/// The request a [`Event::Failure`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Scan,
    Connect,
    /// Service discovery issued when the link came up.
    Discover,
    /// Signal strength read issued when the link came up.
    SignalStrength,
    Read(CharacteristicRef),
    Write(CharacteristicRef),
    Subscribe(CharacteristicRef),
    Unsubscribe(CharacteristicRef),
    /// Decoding a value pushed by the peripheral.
    Changed(CharacteristicRef),
}

impl Operation {
    /// Characteristic the operation targets, if any.
    #[must_use]
    pub fn characteristic(&self) -> Option<CharacteristicRef> {
        match self {
            Self::Scan | Self::Connect | Self::Discover | Self::SignalStrength => None,
            Self::Read(c)
            | Self::Write(c)
            | Self::Subscribe(c)
            | Self::Unsubscribe(c)
            | Self::Changed(c) => Some(*c),
        }
    }

    /// Short lowercase name, e.g. `read` or `signal_strength`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Connect => "connect",
            Self::Discover => "discover",
            Self::SignalStrength => "signal_strength",
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Changed(_) => "changed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.characteristic() {
            Some(characteristic) => write!(f, "{} {characteristic}", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

impl Event {
    /// Host-facing event name.
    ///
    /// Value events are split by kind, e.g. `IntValueRead` or `StringValueChanged`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceFound { .. } => "DeviceFound",
            Self::SignalStrengthChanged { .. } => "SignalStrengthChanged",
            Self::Connected { .. } => "Connected",
            Self::ServicesDiscovered { .. } => "ServicesDiscovered",
            Self::ValueRead { value, .. } => match value.kind() {
                ValueKind::Bytes => "ByteValueRead",
                ValueKind::Int => "IntValueRead",
                ValueKind::Text => "StringValueRead",
                ValueKind::Float => "FloatValueRead",
            },
            Self::ValueChanged { value, .. } => match value.kind() {
                ValueKind::Bytes => "ByteValueChanged",
                ValueKind::Int => "IntValueChanged",
                ValueKind::Text => "StringValueChanged",
                ValueKind::Float => "FloatValueChanged",
            },
            Self::ValueWritten { .. } => "ValueWritten",
            Self::Disconnected { .. } => "Disconnected",
            Self::Failure { .. } => "Failure",
        }
    }

    /// Peripheral the event concerns, if any.
    #[must_use]
    pub fn address(&self) -> Option<&PeripheralAddress> {
        match self {
            Self::DeviceFound { peripheral } => Some(&peripheral.address),
            Self::SignalStrengthChanged { address, .. }
            | Self::Connected { address }
            | Self::ServicesDiscovered { address, .. }
            | Self::ValueRead { address, .. }
            | Self::ValueChanged { address, .. }
            | Self::ValueWritten { address, .. }
            | Self::Disconnected { address } => Some(address),
            Self::Failure { address, .. } => address.as_ref(),
        }
    }
}
