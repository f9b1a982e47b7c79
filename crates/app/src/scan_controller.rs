//! Scan controller: feeds sightings into the Device Registry.
//!
//! Every scan gets a new generation number. Sightings tagged with an older
//! generation come from a scan that was stopped or restarted and are dropped,
//! so a restart can never repopulate the cleared registry with stale entries.

use gattlink_domain::event::Event;
use gattlink_domain::registry::{DeviceRegistry, Sighting as Recorded};

use crate::config::EngineConfig;
use crate::ports::transport::Sighting;

/// Owns the registry and the scan lifecycle.
#[derive(Debug, Default)]
pub struct ScanController {
    registry: DeviceRegistry,
    scanning: bool,
    generation: u64,
    device_filter: Vec<String>,
    min_signal_strength: Option<i16>,
}

impl ScanController {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            device_filter: config.device_filter.clone(),
            min_signal_strength: config.min_signal_strength,
            ..Self::default()
        }
    }

    /// Begin a new scan: clear the registry and return the new generation.
    ///
    /// Returns whether a previous scan was still running alongside it.
    pub fn start(&mut self) -> (u64, bool) {
        let was_scanning = self.scanning;
        self.registry.clear();
        self.generation += 1;
        self.scanning = true;
        (self.generation, was_scanning)
    }

    /// End the current scan. The registry keeps its contents.
    ///
    /// Returns whether a scan was running.
    pub fn stop(&mut self) -> bool {
        let was_scanning = self.scanning;
        if was_scanning {
            self.generation += 1;
            self.scanning = false;
        }
        was_scanning
    }

    /// The scan of `generation` failed on the transport side.
    ///
    /// Returns whether that scan was the current one.
    pub fn fail(&mut self, generation: u64) -> bool {
        if generation == self.generation && self.scanning {
            self.scanning = false;
            return true;
        }
        false
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Record one sighting and return the events it raises.
    ///
    /// A new address raises `DeviceFound`; every sighting raises
    /// `SignalStrengthChanged`.
    pub fn on_sighting(&mut self, generation: u64, sighting: Sighting) -> Vec<Event> {
        if !self.scanning || generation != self.generation {
            tracing::trace!(address = %sighting.address, generation, "dropping sighting from stale scan");
            return Vec::new();
        }
        if !self.passes_filter(sighting.address.as_str()) {
            tracing::trace!(address = %sighting.address, "filtered out by device_filter");
            return Vec::new();
        }
        if self
            .min_signal_strength
            .is_some_and(|min| sighting.signal_strength < min)
        {
            return Vec::new();
        }

        let Sighting {
            address,
            name,
            signal_strength,
        } = sighting;
        let mut events = Vec::with_capacity(2);
        let recorded = self
            .registry
            .record_sighting(address.clone(), name, signal_strength);
        let found = (recorded == Recorded::New)
            .then(|| self.registry.find(&address).cloned())
            .flatten();
        if let Some(peripheral) = found {
            tracing::debug!(%address, name = ?peripheral.name, signal_strength, "device found");
            events.push(Event::DeviceFound { peripheral });
        }
        events.push(Event::SignalStrengthChanged {
            address,
            signal_strength,
        });
        events
    }

    /// Check whether the given address passes the device filter.
    fn passes_filter(&self, address: &str) -> bool {
        if self.device_filter.is_empty() {
            return true;
        }
        self.device_filter
            .iter()
            .any(|f| f.eq_ignore_ascii_case(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(address: &str, signal_strength: i16) -> Sighting {
        Sighting {
            address: address.into(),
            name: Some(format!("{address}-name")),
            signal_strength,
        }
    }

    fn names(events: &[Event]) -> Vec<&'static str> {
        events.iter().map(Event::name).collect()
    }

    #[test]
    fn should_raise_device_found_once_and_strength_every_time() {
        let mut scan = ScanController::default();
        let (generation, _) = scan.start();

        let first = scan.on_sighting(generation, sighting("AA:01", -60));
        assert_eq!(names(&first), vec!["DeviceFound", "SignalStrengthChanged"]);

        let second = scan.on_sighting(generation, sighting("AA:01", -30));
        assert_eq!(names(&second), vec!["SignalStrengthChanged"]);
        assert_eq!(scan.registry().len(), 1);
    }

    #[test]
    fn should_clear_registry_on_start_but_not_on_stop() {
        let mut scan = ScanController::default();
        let (generation, was_scanning) = scan.start();
        assert!(!was_scanning);
        scan.on_sighting(generation, sighting("AA:01", -60));

        assert!(scan.stop());
        assert_eq!(scan.registry().len(), 1);
        assert!(!scan.stop());

        let (_, was_scanning) = scan.start();
        assert!(!was_scanning);
        assert!(scan.registry().is_empty());
    }

    #[test]
    fn should_drop_sightings_from_previous_generation() {
        let mut scan = ScanController::default();
        let (old, _) = scan.start();
        let (current, was_scanning) = scan.start();
        assert!(was_scanning);

        assert!(scan.on_sighting(old, sighting("AA:01", -60)).is_empty());
        assert!(!scan.on_sighting(current, sighting("AA:01", -60)).is_empty());

        scan.stop();
        assert!(scan.on_sighting(current, sighting("BB:02", -60)).is_empty());
    }

    #[test]
    fn should_apply_device_filter_case_insensitively() {
        let config = EngineConfig {
            device_filter: vec!["aa:01".to_string()],
            ..EngineConfig::default()
        };
        let mut scan = ScanController::new(&config);
        let (generation, _) = scan.start();
        assert!(!scan.on_sighting(generation, sighting("AA:01", -60)).is_empty());
        assert!(scan.on_sighting(generation, sighting("BB:02", -60)).is_empty());
    }

    #[test]
    fn should_ignore_sightings_below_minimum_strength() {
        let config = EngineConfig {
            min_signal_strength: Some(-70),
            ..EngineConfig::default()
        };
        let mut scan = ScanController::new(&config);
        let (generation, _) = scan.start();
        assert!(scan.on_sighting(generation, sighting("AA:01", -80)).is_empty());
        assert_eq!(scan.on_sighting(generation, sighting("AA:01", -70)).len(), 2);
    }

    #[test]
    fn should_only_fail_current_scan() {
        let mut scan = ScanController::default();
        let (old, _) = scan.start();
        let (current, _) = scan.start();
        assert!(!scan.fail(old));
        assert!(scan.is_scanning());
        assert!(scan.fail(current));
        assert!(!scan.is_scanning());
    }
}
