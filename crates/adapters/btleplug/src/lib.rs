//! # gattlink-adapter-btleplug
//!
//! BLE transport backed by [`btleplug`]: scans, connects and performs GATT
//! operations on the host Bluetooth adapter.
//!
//! ## How it works
//!
//! Every [`Transport`] call returns immediately and spawns a task on the
//! runtime captured by [`BtleplugTransport::open`]. The task runs the
//! btleplug future and reports back through the completion handle or sink
//! it was given. Each session owns one long-running link task which also
//! forwards notifications and detects link loss.
//!
//! ## Platform notes
//!
//! - btleplug has no dedicated RSSI read; the signal strength of a connected
//!   peripheral is the last value reported in its advertised properties.
//! - Writing the client-configuration descriptor maps to btleplug
//!   `subscribe`/`unsubscribe`, which enable notifications or indications as
//!   the characteristic supports.
//!
//! ## Dependency rule
//!
//! Same as other adapters: depends on `gattlink-app` and `gattlink-domain`.

mod config;
mod convert;
mod error;
mod link;
mod scanner;

pub use config::BtleplugConfig;
pub use error::BtleplugError;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use btleplug::api::{
    CharPropFlags, Characteristic, Central, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use gattlink_app::mailbox::Payload;
use gattlink_app::ports::Transport;
use gattlink_app::ports::transport::{Completion, LinkSink, SightingSink};
use gattlink_domain::error::TransportError;
use gattlink_domain::gatt::{
    CLIENT_CHARACTERISTIC_CONFIGURATION, CharacteristicRef, DescriptorRef, GattService,
};
use gattlink_domain::id::{PeripheralAddress, SessionId};

use crate::link::{Link, Links};

enum ScanTask {
    Running(JoinHandle<()>),
    Stopping(JoinHandle<()>),
}

/// [`Transport`] over the host Bluetooth stack.
pub struct BtleplugTransport {
    runtime: Handle,
    adapter: Adapter,
    config: BtleplugConfig,
    scan: Mutex<Option<ScanTask>>,
    links: Links,
}

impl BtleplugTransport {
    /// Open the configured host adapter.
    ///
    /// Must be called from within a tokio runtime; spawned work runs on it.
    ///
    /// # Errors
    ///
    /// Returns [`BtleplugError::NotAvailable`] when there is no adapter at
    /// `adapter_index`, or [`BtleplugError::Btleplug`] when the platform
    /// manager cannot be created.
    pub async fn open(config: BtleplugConfig) -> Result<Self, BtleplugError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BtleplugError::NotAvailable)?;
        match adapter.adapter_info().await {
            Ok(info) => tracing::info!(adapter = %info, "BLE adapter opened"),
            Err(err) => tracing::debug!(%err, "BLE adapter opened without info"),
        }
        Ok(Self {
            runtime: Handle::current(),
            adapter,
            config,
            scan: Mutex::new(None),
            links: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn peripheral(&self, session: SessionId) -> Option<Peripheral> {
        lock(&self.links)
            .get(&session)
            .and_then(|link| link.peripheral.clone())
    }

    /// Run `op` against the session's peripheral and report its result.
    fn spawn_op<T, F, Fut>(&self, session: SessionId, done: Completion<T>, op: F)
    where
        T: Payload + Send + 'static,
        F: FnOnce(Peripheral) -> Fut,
        Fut: Future<Output = Result<T, BtleplugError>> + Send + 'static,
    {
        let pending = self.peripheral(session).map(op);
        self.runtime.spawn(async move {
            let result = match pending {
                Some(op) => op.await,
                None => Err(BtleplugError::NotConnected),
            };
            if let Err(err) = &result {
                tracing::debug!(%session, %err, "GATT operation failed");
            }
            done.complete(result.map_err(TransportError::from));
        });
    }
}

impl Transport for BtleplugTransport {
    fn start_scan(&self, sink: SightingSink) {
        let mut scan = lock(&self.scan);
        let stopping = match scan.take() {
            Some(ScanTask::Running(task)) => {
                task.abort();
                None
            }
            Some(ScanTask::Stopping(task)) => Some(task),
            None => None,
        };
        let adapter = self.adapter.clone();
        let filter = ScanFilter {
            services: self.config.service_filter.clone(),
        };
        let task = self.runtime.spawn(async move {
            // the platform stop of the previous scan must land first
            if let Some(stopping) = stopping {
                await_scan_stop(stopping).await;
            }
            scanner::run(adapter, filter, sink).await;
        });
        *scan = Some(ScanTask::Running(task));
    }

    fn stop_scan(&self) {
        let mut scan = lock(&self.scan);
        if let Some(ScanTask::Running(task)) = scan.take() {
            task.abort();
        }
        let adapter = self.adapter.clone();
        let task = self.runtime.spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                tracing::warn!(%err, "failed to stop BLE scan");
            }
        });
        *scan = Some(ScanTask::Stopping(task));
    }

    fn connect(&self, session: SessionId, address: &PeripheralAddress, sink: LinkSink) {
        let mut links = lock(&self.links);
        let task = self.runtime.spawn(link::establish(
            self.adapter.clone(),
            address.clone(),
            session,
            Arc::clone(&self.links),
            sink,
        ));
        links.insert(
            session,
            Link {
                address: address.clone(),
                peripheral: None,
                task,
            },
        );
    }

    fn disconnect(&self, address: &PeripheralAddress) {
        let removed = {
            let mut links = lock(&self.links);
            let session = links
                .iter()
                .find(|(_, link)| link.address == *address)
                .map(|(session, _)| *session);
            session.and_then(|session| links.remove(&session))
        };
        let peripheral = removed.and_then(|link| {
            link.task.abort();
            link.peripheral
        });
        let adapter = self.adapter.clone();
        let address = address.clone();
        self.runtime.spawn(async move {
            let result = match peripheral {
                Some(peripheral) => peripheral.disconnect().await.map_err(BtleplugError::from),
                None => link::close(&adapter, &address).await,
            };
            if let Err(err) = result {
                tracing::warn!(%address, %err, "failed to disconnect");
            }
        });
    }

    fn discover_services(&self, session: SessionId, done: Completion<Vec<GattService>>) {
        self.spawn_op(session, done, |peripheral| async move {
            peripheral.discover_services().await?;
            Ok(convert::services(&peripheral.services()))
        });
    }

    fn read_characteristic(
        &self,
        session: SessionId,
        characteristic: CharacteristicRef,
        done: Completion<Vec<u8>>,
    ) {
        self.spawn_op(session, done, move |peripheral| async move {
            let target = characteristic_of(&peripheral, &characteristic)?;
            Ok(peripheral.read(&target).await?)
        });
    }

    fn write_characteristic(
        &self,
        session: SessionId,
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        done: Completion<()>,
    ) {
        self.spawn_op(session, done, move |peripheral| async move {
            let target = characteristic_of(&peripheral, &characteristic)?;
            let write_type = if target.properties.contains(CharPropFlags::WRITE) {
                WriteType::WithResponse
            } else {
                WriteType::WithoutResponse
            };
            Ok(peripheral.write(&target, &value, write_type).await?)
        });
    }

    fn write_descriptor(
        &self,
        session: SessionId,
        descriptor: DescriptorRef,
        value: Vec<u8>,
        done: Completion<()>,
    ) {
        self.spawn_op(session, done, move |peripheral| async move {
            let target = characteristic_of(&peripheral, &descriptor.characteristic)?;
            if descriptor.descriptor == CLIENT_CHARACTERISTIC_CONFIGURATION {
                if value.iter().all(|b| *b == 0) {
                    peripheral.unsubscribe(&target).await?;
                } else {
                    peripheral.subscribe(&target).await?;
                }
                return Ok(());
            }
            let found = target
                .descriptors
                .iter()
                .find(|d| d.uuid == descriptor.descriptor)
                .cloned()
                .ok_or(BtleplugError::DescriptorNotFound {
                    uuid: descriptor.descriptor,
                })?;
            Ok(peripheral.write_descriptor(&found, &value).await?)
        });
    }

    fn read_signal_strength(&self, session: SessionId, done: Completion<i16>) {
        self.spawn_op(session, done, |peripheral| async move {
            peripheral
                .properties()
                .await?
                .and_then(|properties| properties.rssi)
                .ok_or(BtleplugError::SignalStrengthUnavailable)
        });
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(ScanTask::Running(task) | ScanTask::Stopping(task)) = lock(&self.scan).take() {
            task.abort();
        }
        for (_, link) in lock(&self.links).drain() {
            link.task.abort();
        }
        tracing::debug!("BLE transport tasks aborted");
    }
}

fn characteristic_of(
    peripheral: &Peripheral,
    target: &CharacteristicRef,
) -> Result<Characteristic, BtleplugError> {
    convert::find(&peripheral.characteristics(), target)
        .cloned()
        .ok_or(BtleplugError::CharacteristicNotFound {
            uuid: target.characteristic,
        })
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait for a pending scan stop, logging a stop task that panicked or was cancelled.
async fn await_scan_stop(stopping: JoinHandle<()>) {
    if let Err(err) = stopping.await {
        tracing::debug!(%err, "previous scan stop task failed");
    }
}
