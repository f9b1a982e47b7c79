//! Link lifecycle: connect, watch for notifications and link loss, close.
//!
//! One task per session runs [`establish`]: it opens the link, reports it to
//! the [`LinkSink`] and then keeps forwarding pushed values until the
//! peripheral drops or the task is aborted by an explicit disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use gattlink_app::ports::transport::LinkSink;
use gattlink_domain::gatt::CharacteristicRef;
use gattlink_domain::id::{PeripheralAddress, SessionId};

use crate::error::BtleplugError;
use crate::{convert, lock};

/// An open or opening link.
pub(crate) struct Link {
    pub(crate) address: PeripheralAddress,
    /// Set once the platform connection succeeded.
    pub(crate) peripheral: Option<Peripheral>,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) type Links = Arc<Mutex<HashMap<SessionId, Link>>>;

/// Connect, report the outcome and watch the link until it ends.
pub(crate) async fn establish(
    adapter: Adapter,
    address: PeripheralAddress,
    session: SessionId,
    links: Links,
    sink: LinkSink,
) {
    let peripheral = match open(&adapter, &address).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            tracing::warn!(%address, %err, "failed to connect");
            lock(&links).remove(&session);
            sink.connect_failed(err.into());
            return;
        }
    };
    {
        let mut links = lock(&links);
        let Some(link) = links.get_mut(&session) else {
            return;
        };
        link.peripheral = Some(peripheral.clone());
    }
    tracing::info!(%address, %session, "link established");
    sink.connected();

    if let Err(err) = watch(&adapter, &peripheral, &sink).await {
        tracing::warn!(%address, %err, "lost track of link");
    }
    lock(&links).remove(&session);
    tracing::info!(%address, "link closed");
    sink.disconnected();
}

/// Close the link to a peripheral whose connection never got registered.
pub(crate) async fn close(adapter: &Adapter, address: &PeripheralAddress) -> Result<(), BtleplugError> {
    let peripheral = find_peripheral(adapter, address).await?;
    if peripheral.is_connected().await? {
        peripheral.disconnect().await?;
    }
    Ok(())
}

async fn open(adapter: &Adapter, address: &PeripheralAddress) -> Result<Peripheral, BtleplugError> {
    let peripheral = find_peripheral(adapter, address).await?;
    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }
    Ok(peripheral)
}

async fn find_peripheral(
    adapter: &Adapter,
    address: &PeripheralAddress,
) -> Result<Peripheral, BtleplugError> {
    adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| convert::peripheral_address(p.address(), p.id()) == *address)
        .ok_or_else(|| BtleplugError::PeripheralNotFound {
            address: address.to_string(),
        })
}

/// Forward pushed values until the peripheral disconnects.
async fn watch(adapter: &Adapter, peripheral: &Peripheral, sink: &LinkSink) -> Result<(), BtleplugError> {
    let mut notifications = peripheral.notifications().await?;
    let mut events = adapter.events().await?;
    let id = peripheral.id();

    loop {
        tokio::select! {
            notification = notifications.next() => {
                let Some(notification) = notification else {
                    return Ok(());
                };
                match owning_characteristic(peripheral, notification.uuid) {
                    Some(characteristic) => sink.value_changed(characteristic, notification.value),
                    None => tracing::trace!(uuid = %notification.uuid, "notification for unknown characteristic"),
                }
            }
            event = events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => return Ok(()),
                Some(_) => {}
                None => return Ok(()),
            },
        }
    }
}

fn owning_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<CharacteristicRef> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .map(|c| CharacteristicRef::new(c.service_uuid, c.uuid))
}
