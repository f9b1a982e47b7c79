//! GATT tree: services, characteristics, descriptors and connection states.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{BoundsError, ListKind};

/// UUID of the Client Characteristic Configuration descriptor (`0x2902`).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// Descriptor value that enables notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Descriptor value that enables indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// Descriptor value that disables both notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Longest attribute value ATT allows, in bytes.
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Connection state of a GATT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ServicesDiscovered,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ServicesDiscovered => "services_discovered",
        })
    }
}

/// Operation flags advertised by a characteristic (Bluetooth Core, Vol 3, Part G, 3.3.1.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
    pub const AUTHENTICATED_SIGNED_WRITES: u8 = 0x40;
    pub const EXTENDED_PROPERTIES: u8 = 0x80;

    const NAMES: [(u8, &'static str); 8] = [
        (Self::BROADCAST, "broadcast"),
        (Self::READ, "read"),
        (Self::WRITE_WITHOUT_RESPONSE, "write_without_response"),
        (Self::WRITE, "write"),
        (Self::NOTIFY, "notify"),
        (Self::INDICATE, "indicate"),
        (Self::AUTHENTICATED_SIGNED_WRITES, "authenticated_signed_writes"),
        (Self::EXTENDED_PROPERTIES, "extended_properties"),
    ];

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every flag in `flags` is set.
    #[must_use]
    pub const fn contains(self, flags: u8) -> bool {
        self.0 & flags == flags
    }

    #[must_use]
    pub const fn supports_indicate(self) -> bool {
        self.contains(Self::INDICATE)
    }

    #[must_use]
    pub const fn supports_notify(self) -> bool {
        self.contains(Self::NOTIFY)
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A descriptor attached to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattDescriptor {
    pub uuid: Uuid,
}

/// A characteristic within a discovered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    /// Address of this characteristic within the tree.
    #[must_use]
    pub fn reference(&self) -> CharacteristicRef {
        CharacteristicRef {
            service: self.service,
            characteristic: self.uuid,
        }
    }

    /// The client-configuration descriptor, if the characteristic exposes one.
    #[must_use]
    pub fn client_configuration(&self) -> Option<DescriptorRef> {
        self.descriptors
            .iter()
            .any(|d| d.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION)
            .then(|| DescriptorRef {
                characteristic: self.reference(),
                descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
            })
    }

    /// Descriptor value that turns on push delivery: indication when
    /// supported, notification otherwise.
    #[must_use]
    pub fn enable_push_value(&self) -> [u8; 2] {
        if self.properties.supports_indicate() {
            ENABLE_INDICATION_VALUE
        } else {
            ENABLE_NOTIFICATION_VALUE
        }
    }
}

/// A discovered primary service and its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Addresses a characteristic by `(service UUID, characteristic UUID)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    #[must_use]
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// Addresses a descriptor of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRef {
    pub characteristic: CharacteristicRef,
    pub descriptor: Uuid,
}

/// Find a characteristic by linear scan of the discovered tree.
#[must_use]
pub fn find_characteristic<'a>(
    services: &'a [GattService],
    target: &CharacteristicRef,
) -> Option<&'a GattCharacteristic> {
    services
        .iter()
        .filter(|s| s.uuid == target.service)
        .flat_map(|s| s.characteristics.iter())
        .find(|c| c.uuid == target.characteristic)
}

/// Look up a service by 1-based position.
///
/// # Errors
///
/// Returns [`BoundsError`] when `position` is 0 or past the end.
pub fn service_at(services: &[GattService], position: usize) -> Result<&GattService, BoundsError> {
    position
        .checked_sub(1)
        .and_then(|slot| services.get(slot))
        .ok_or(BoundsError {
            list: ListKind::Services,
            position,
            len: services.len(),
        })
}

/// Look up a characteristic by 1-based position across all services, in
/// discovery order.
///
/// # Errors
///
/// Returns [`BoundsError`] when `position` is 0 or past the end.
pub fn characteristic_at(
    services: &[GattService],
    position: usize,
) -> Result<&GattCharacteristic, BoundsError> {
    let mut all = services.iter().flat_map(|s| s.characteristics.iter());
    let found = position.checked_sub(1).and_then(|slot| all.nth(slot));
    found.ok_or_else(|| BoundsError {
        list: ListKind::Characteristics,
        position,
        len: services.iter().map(|s| s.characteristics.len()).sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE_A: Uuid = Uuid::from_u128(0xA);
    const SERVICE_B: Uuid = Uuid::from_u128(0xB);

    fn characteristic(service: Uuid, id: u128, props: u8, cccd: bool) -> GattCharacteristic {
        GattCharacteristic {
            uuid: Uuid::from_u128(id),
            service,
            properties: CharacteristicProperties::from_bits(props),
            descriptors: if cccd {
                vec![GattDescriptor {
                    uuid: CLIENT_CHARACTERISTIC_CONFIGURATION,
                }]
            } else {
                Vec::new()
            },
        }
    }

    fn tree() -> Vec<GattService> {
        vec![
            GattService {
                uuid: SERVICE_A,
                characteristics: vec![
                    characteristic(SERVICE_A, 1, CharacteristicProperties::READ, false),
                    characteristic(SERVICE_A, 2, CharacteristicProperties::NOTIFY, true),
                ],
            },
            GattService {
                uuid: SERVICE_B,
                characteristics: vec![characteristic(
                    SERVICE_B,
                    1,
                    CharacteristicProperties::INDICATE | CharacteristicProperties::NOTIFY,
                    true,
                )],
            },
        ]
    }

    #[test]
    fn should_find_characteristic_scoped_to_its_service() {
        let services = tree();
        let found = find_characteristic(&services, &CharacteristicRef::new(SERVICE_B, Uuid::from_u128(1)))
            .unwrap();
        assert_eq!(found.service, SERVICE_B);
        assert!(
            find_characteristic(&services, &CharacteristicRef::new(SERVICE_B, Uuid::from_u128(2)))
                .is_none()
        );
    }

    #[test]
    fn should_prefer_indication_when_supported() {
        let services = tree();
        assert_eq!(
            services[1].characteristics[0].enable_push_value(),
            ENABLE_INDICATION_VALUE
        );
        assert_eq!(
            services[0].characteristics[1].enable_push_value(),
            ENABLE_NOTIFICATION_VALUE
        );
    }

    #[test]
    fn should_expose_client_configuration_only_when_present() {
        let services = tree();
        assert!(services[0].characteristics[0].client_configuration().is_none());
        let descriptor = services[0].characteristics[1]
            .client_configuration()
            .unwrap();
        assert_eq!(descriptor.descriptor, CLIENT_CHARACTERISTIC_CONFIGURATION);
        assert_eq!(descriptor.characteristic.service, SERVICE_A);
    }

    #[test]
    fn should_index_services_and_characteristics_from_one() {
        let services = tree();
        assert_eq!(service_at(&services, 2).unwrap().uuid, SERVICE_B);
        assert!(service_at(&services, 0).is_err());
        assert!(service_at(&services, 3).is_err());

        assert_eq!(characteristic_at(&services, 3).unwrap().service, SERVICE_B);
        let err = characteristic_at(&services, 4).unwrap_err();
        assert_eq!(err.len, 3);
        assert_eq!(err.list, ListKind::Characteristics);
    }

    #[test]
    fn should_render_properties_as_flag_names() {
        let props = CharacteristicProperties::from_bits(
            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        );
        assert_eq!(props.to_string(), "read|notify");
        assert_eq!(CharacteristicProperties::default().to_string(), "");
    }
}
