//! btleplug adapter error types.

use gattlink_domain::error::TransportError;

/// Errors specific to the btleplug transport.
#[derive(Debug, thiserror::Error)]
pub enum BtleplugError {
    /// No BLE adapter found on the host.
    #[error("no BLE adapter available")]
    NotAvailable,

    /// The platform stack rejected an operation.
    #[error("BLE error: {0}")]
    Btleplug(#[from] btleplug::Error),

    /// No known peripheral has the requested address.
    #[error("peripheral {address} not found")]
    PeripheralNotFound {
        /// The address that was looked up.
        address: String,
    },

    /// The session has no open link.
    #[error("session is not connected")]
    NotConnected,

    /// The peripheral does not expose the characteristic.
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound {
        /// UUID of the missing characteristic.
        uuid: uuid::Uuid,
    },

    /// The characteristic does not carry the descriptor.
    #[error("descriptor {uuid} not found")]
    DescriptorNotFound {
        /// UUID of the missing descriptor.
        uuid: uuid::Uuid,
    },

    /// The platform did not report a signal strength for the peripheral.
    #[error("signal strength unavailable")]
    SignalStrengthUnavailable,
}

impl From<BtleplugError> for TransportError {
    fn from(err: BtleplugError) -> Self {
        TransportError::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_not_available_error() {
        let err = BtleplugError::NotAvailable;
        assert_eq!(err.to_string(), "no BLE adapter available");
    }

    #[test]
    fn should_display_peripheral_not_found_error() {
        let err = BtleplugError::PeripheralNotFound {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        assert_eq!(err.to_string(), "peripheral AA:BB:CC:DD:EE:FF not found");
    }

    #[test]
    fn should_carry_message_into_transport_error() {
        let err: TransportError = BtleplugError::Btleplug(btleplug::Error::DeviceNotFound).into();
        assert!(err.message().starts_with("BLE error:"));
    }

    #[test]
    fn should_convert_missing_characteristic_to_transport_error() {
        let uuid = uuid::Uuid::from_u128(0x2A19);
        let err: TransportError = BtleplugError::CharacteristicNotFound { uuid }.into();
        assert!(err.message().contains(&uuid.to_string()));
    }
}
