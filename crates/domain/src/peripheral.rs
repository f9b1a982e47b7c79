//! Peripheral: a device observed during a scan.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::id::PeripheralAddress;

/// A discovered BLE peripheral and its latest observed signal strength.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peripheral {
    /// Stable identifier; unique within a discovery session.
    pub address: PeripheralAddress,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Last observed signal strength in dBm.
    pub signal_strength: i16,
    /// When this peripheral was first sighted in the current scan.
    pub first_seen: DateTime<Utc>,
    /// When this peripheral was last sighted.
    pub last_seen: DateTime<Utc>,
}

impl Peripheral {
    /// Create a peripheral from its first sighting.
    #[must_use]
    pub fn sighted(address: PeripheralAddress, name: Option<String>, signal_strength: i16) -> Self {
        let now = Utc::now();
        Self {
            address,
            name,
            signal_strength,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Apply a repeat sighting in place.
    ///
    /// A missing name never erases a previously advertised one.
    pub fn resighted(&mut self, name: Option<String>, signal_strength: i16) {
        if name.is_some() {
            self.name = name;
        }
        self.signal_strength = signal_strength;
        self.last_seen = Utc::now();
    }

    /// Display name, or an empty string when none was advertised.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_update_strength_and_keep_name_when_resighted_anonymously() {
        let mut peripheral = Peripheral::sighted("AA:01".into(), Some("Sensor1".to_string()), -60);
        peripheral.resighted(None, -30);
        assert_eq!(peripheral.signal_strength, -30);
        assert_eq!(peripheral.display_name(), "Sensor1");
        assert!(peripheral.last_seen >= peripheral.first_seen);
    }

    #[test]
    fn should_render_empty_display_name_when_unnamed() {
        let peripheral = Peripheral::sighted("AA:01".into(), None, -60);
        assert_eq!(peripheral.display_name(), "");
    }
}
