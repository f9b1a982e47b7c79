//! Conversions between btleplug types and the domain GATT tree.

use std::collections::BTreeSet;
use std::fmt::Display;

use btleplug::api::{BDAddr, CharPropFlags, Characteristic, Service};

use gattlink_domain::gatt::{
    CharacteristicProperties, CharacteristicRef, GattCharacteristic, GattDescriptor, GattService,
};
use gattlink_domain::id::PeripheralAddress;

/// Address reported to the engine for a peripheral.
///
/// Platforms that hide the hardware address (macOS) report a zero `BDAddr`;
/// the platform peripheral id is used instead.
pub(crate) fn peripheral_address(address: BDAddr, id: impl Display) -> PeripheralAddress {
    if address == BDAddr::default() {
        PeripheralAddress::new(id.to_string())
    } else {
        PeripheralAddress::new(address.to_string())
    }
}

pub(crate) fn properties(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties::from_bits(flags.bits())
}

pub(crate) fn characteristic(source: &Characteristic) -> GattCharacteristic {
    GattCharacteristic {
        uuid: source.uuid,
        service: source.service_uuid,
        properties: properties(source.properties),
        descriptors: source
            .descriptors
            .iter()
            .map(|d| GattDescriptor { uuid: d.uuid })
            .collect(),
    }
}

pub(crate) fn services(source: &BTreeSet<Service>) -> Vec<GattService> {
    source
        .iter()
        .map(|service| GattService {
            uuid: service.uuid,
            characteristics: service.characteristics.iter().map(characteristic).collect(),
        })
        .collect()
}

/// Find the btleplug characteristic a reference points at.
pub(crate) fn find<'a>(
    characteristics: &'a BTreeSet<Characteristic>,
    target: &CharacteristicRef,
) -> Option<&'a Characteristic> {
    characteristics
        .iter()
        .find(|c| c.service_uuid == target.service && c.uuid == target.characteristic)
}
