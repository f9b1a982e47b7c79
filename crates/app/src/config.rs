//! Engine configuration.

use serde::Deserialize;

/// Behaviour switches for [`BleEngine`](crate::engine::BleEngine).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable push delivery (write the client-configuration descriptor) before
    /// every read of a characteristic that supports it.
    ///
    /// Many peripherals only refresh descriptor-driven values once a client
    /// has subscribed, so this defaults to `true`.
    pub prime_notifications_on_read: bool,
    /// Optional address allowlist (e.g. `["A4:C1:38:AA:BB:CC"]`), matched
    /// case-insensitively.
    ///
    /// When empty, every sighting is accepted.
    pub device_filter: Vec<String>,
    /// Ignore sightings weaker than this many dBm.
    pub min_signal_strength: Option<i16>,
    /// Capacity of the in-process event bus.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prime_notifications_on_read: true,
            device_filter: Vec::new(),
            min_signal_strength: None,
            event_buffer: 256,
        }
    }
}
