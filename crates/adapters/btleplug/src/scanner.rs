//! BLE scanner: streams advertisements from the host adapter into a
//! [`SightingSink`].

use std::fmt::Display;

use btleplug::api::{Central, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::Adapter;
use tokio_stream::StreamExt as _;

use gattlink_app::ports::Sighting;
use gattlink_app::ports::transport::SightingSink;

use crate::convert;
use crate::error::BtleplugError;

/// Scan until the task is aborted, reporting a failure to the sink if the
/// scan cannot be started.
pub(crate) async fn run(adapter: Adapter, filter: ScanFilter, sink: SightingSink) {
    if let Err(err) = scan(&adapter, filter, &sink).await {
        tracing::warn!(%err, "BLE scan failed");
        sink.failed(err.into());
    }
}

async fn scan(adapter: &Adapter, filter: ScanFilter, sink: &SightingSink) -> Result<(), BtleplugError> {
    let mut events = adapter.events().await?;
    adapter.start_scan(filter).await?;
    tracing::debug!("BLE scan running");

    while let Some(event) = events.next().await {
        let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event else {
            continue;
        };
        let Ok(peripheral) = adapter.peripheral(&id).await else {
            continue;
        };
        let Ok(Some(properties)) = peripheral.properties().await else {
            continue;
        };
        match sighting(&id, properties) {
            Some(sighting) => {
                tracing::trace!(address = %sighting.address, name = ?sighting.name, "BLE device detected");
                sink.sighted(sighting);
            }
            None => tracing::trace!(%id, "advertisement without signal strength"),
        }
    }
    Ok(())
}

/// Build a sighting from advertised properties; `None` without an RSSI.
fn sighting(id: impl Display, properties: PeripheralProperties) -> Option<Sighting> {
    let signal_strength = properties.rssi?;
    Some(Sighting {
        address: convert::peripheral_address(properties.address, id),
        name: properties.local_name,
        signal_strength,
    })
}
