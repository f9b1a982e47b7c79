//! btleplug transport configuration.

use serde::Deserialize;
use uuid::Uuid;

/// Configuration for the btleplug transport.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BtleplugConfig {
    /// Which host adapter to use, as listed by the platform manager.
    pub adapter_index: usize,
    /// Only report peripherals advertising one of these services.
    ///
    /// When empty, every advertisement is reported.
    pub service_filter: Vec<Uuid>,
}
