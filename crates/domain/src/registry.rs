//! Device Registry: discovered peripherals ranked by signal strength.
//!
//! Entries are kept in first-seen order; ranking is a stable sort over a
//! copy, so peripherals with equal strength never swap places between calls
//! and callers never alias the live collection.

use std::collections::HashMap;

use crate::error::{BoundsError, ListKind};
use crate::id::PeripheralAddress;
use crate::peripheral::Peripheral;

/// Whether a sighting introduced a new peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// First sighting of this address in the current discovery session.
    New,
    /// The address was already known; its strength was updated in place.
    Repeat,
}

/// Set of peripherals seen since the last [`clear`](DeviceRegistry::clear).
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    entries: Vec<Peripheral>,
    index: HashMap<PeripheralAddress, usize>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new peripheral or update an existing one's strength.
    pub fn record_sighting(
        &mut self,
        address: PeripheralAddress,
        name: Option<String>,
        signal_strength: i16,
    ) -> Sighting {
        if let Some(&slot) = self.index.get(&address) {
            self.entries[slot].resighted(name, signal_strength);
            return Sighting::Repeat;
        }
        self.index.insert(address.clone(), self.entries.len());
        self.entries
            .push(Peripheral::sighted(address, name, signal_strength));
        Sighting::New
    }

    /// Snapshot of all peripherals, strongest first.
    ///
    /// Ties keep first-seen order.
    #[must_use]
    pub fn ranked_list(&self) -> Vec<Peripheral> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
        ranked
    }

    /// Look up a peripheral by 1-based position in the ranked list.
    ///
    /// # Errors
    ///
    /// Returns [`BoundsError`] when `position` is 0 or past the end.
    pub fn get(&self, position: usize) -> Result<Peripheral, BoundsError> {
        let out_of_bounds = || BoundsError {
            list: ListKind::Devices,
            position,
            len: self.entries.len(),
        };
        let slot = position.checked_sub(1).ok_or_else(out_of_bounds)?;
        self.ranked_list()
            .into_iter()
            .nth(slot)
            .ok_or_else(out_of_bounds)
    }

    /// Look up a peripheral by address.
    #[must_use]
    pub fn find(&self, address: &PeripheralAddress) -> Option<&Peripheral> {
        self.index.get(address).map(|&slot| &self.entries[slot])
    }

    /// Render the ranked list as `address name strength` entries joined by `,`.
    #[must_use]
    pub fn describe(&self) -> String {
        self.ranked_list()
            .iter()
            .map(|p| format!("{} {} {}", p.address, p.display_name(), p.signal_strength))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Forget every peripheral.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Number of known peripherals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no peripheral has been seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(registry: &DeviceRegistry) -> Vec<(String, i16)> {
        registry
            .ranked_list()
            .into_iter()
            .map(|p| (p.address.to_string(), p.signal_strength))
            .collect()
    }

    #[test]
    fn should_rank_by_descending_strength_after_resighting() {
        let mut registry = DeviceRegistry::new();
        registry.record_sighting("AA:01".into(), Some("Sensor1".to_string()), -60);
        registry.record_sighting("BB:02".into(), Some("Sensor2".to_string()), -40);
        registry.record_sighting("AA:01".into(), Some("Sensor1".to_string()), -30);

        assert_eq!(
            ranked(&registry),
            vec![("AA:01".to_string(), -30), ("BB:02".to_string(), -40)]
        );
    }

    #[test]
    fn should_update_in_place_without_duplicating() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.record_sighting("AA:01".into(), None, -60), Sighting::New);
        assert_eq!(
            registry.record_sighting("AA:01".into(), None, -50),
            Sighting::Repeat
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find(&"AA:01".into()).unwrap().signal_strength, -50);
    }

    #[test]
    fn should_keep_first_seen_order_among_equal_strengths() {
        let mut registry = DeviceRegistry::new();
        registry.record_sighting("C".into(), None, -50);
        registry.record_sighting("A".into(), None, -50);
        registry.record_sighting("B".into(), None, -70);
        registry.record_sighting("D".into(), None, -50);

        let first = ranked(&registry);
        let second = ranked(&registry);
        assert_eq!(first, second);
        let order: Vec<_> = first.into_iter().map(|(a, _)| a).collect();
        assert_eq!(order, vec!["C", "A", "D", "B"]);
    }

    #[test]
    fn should_stay_sorted_for_arbitrary_sighting_sequences() {
        let mut registry = DeviceRegistry::new();
        let strengths = [-80, -20, -55, -20, -90, -55, -10, -80];
        for (i, strength) in strengths.iter().enumerate() {
            registry.record_sighting(format!("D{}", i % 5).into(), None, *strength);
        }
        let list = registry.ranked_list();
        assert!(
            list.windows(2)
                .all(|w| w[0].signal_strength >= w[1].signal_strength)
        );
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn should_return_bounds_error_for_position_zero_and_past_end() {
        let mut registry = DeviceRegistry::new();
        assert!(matches!(
            registry.get(1),
            Err(BoundsError {
                list: ListKind::Devices,
                position: 1,
                len: 0
            })
        ));

        registry.record_sighting("AA:01".into(), None, -60);
        assert!(registry.get(0).is_err());
        assert!(registry.get(2).is_err());
        assert_eq!(registry.get(1).unwrap().address.as_str(), "AA:01");
    }

    #[test]
    fn should_describe_ranked_list() {
        let mut registry = DeviceRegistry::new();
        registry.record_sighting("AA:01".into(), Some("Sensor1".to_string()), -60);
        registry.record_sighting("BB:02".into(), None, -40);
        assert_eq!(registry.describe(), "BB:02  -40,AA:01 Sensor1 -60");
    }

    #[test]
    fn should_empty_registry_when_cleared() {
        let mut registry = DeviceRegistry::new();
        registry.record_sighting("AA:01".into(), None, -60);
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.find(&"AA:01".into()).is_none());
        assert_eq!(
            registry.record_sighting("AA:01".into(), None, -60),
            Sighting::New
        );
    }
}
