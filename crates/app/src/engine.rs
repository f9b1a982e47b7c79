//! BLE engine: the caller-facing facade over scan, sessions and transport.
//!
//! Caller operations are synchronous and only *initiate* work: they validate,
//! update state under a short lock, release it, then call the transport.
//! Synchronously detectable failures (bounds, not ready, in progress, not
//! found, encode) are returned directly. Everything else arrives through the
//! [`Mailbox`] and is handled by one dispatcher task, which is also the only
//! place the [`EventSink`] is invoked.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gattlink_domain::codec::{DecodeRequest, IntFormat, WriteValue};
use gattlink_domain::error::{GattError, NotFoundError};
use gattlink_domain::event::{Event, Operation};
use gattlink_domain::gatt::{
    self, CharacteristicRef, ConnectionState, GattCharacteristic, GattService,
};
use gattlink_domain::id::{PeripheralAddress, SessionId};
use gattlink_domain::peripheral::Peripheral;

use crate::config::EngineConfig;
use crate::mailbox::{
    Completion, Inbound, LinkSink, Mailbox, OpToken, Outcome, Payload, SightingSink,
};
use crate::ports::{EventSink, LinkEvent, Transport};
use crate::scan_controller::ScanController;
use crate::session::{Command, GattSession, Transition};
use crate::session_manager::SessionManager;

/// Client-side BLE GATT engine.
///
/// Must be started from within a tokio runtime.
pub struct BleEngine<T: Transport> {
    core: Arc<EngineCore<T>>,
    dispatcher: Option<JoinHandle<()>>,
}

struct EngineCore<T> {
    transport: T,
    mailbox: Mailbox,
    scan: Mutex<ScanController>,
    sessions: Mutex<SessionManager>,
}

impl<T: Transport> BleEngine<T> {
    /// Start the engine and its dispatcher task, delivering events to `sink`.
    #[must_use]
    pub fn start<S: EventSink + 'static>(transport: T, sink: S, config: &EngineConfig) -> Self {
        let (mailbox, inbox) = Mailbox::channel();
        let core = Arc::new(EngineCore {
            transport,
            mailbox,
            scan: Mutex::new(ScanController::new(config)),
            sessions: Mutex::new(SessionManager::new(config.prime_notifications_on_read)),
        });
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&core), inbox, sink));
        tracing::debug!("BLE engine started");
        Self {
            core,
            dispatcher: Some(dispatcher),
        }
    }

    // ── Scanning ──

    /// Clear the device registry and start a continuous scan.
    ///
    /// Restarting while a scan runs cancels the previous one first.
    pub fn start_scan(&self) {
        let (generation, was_scanning) = self.core.scan().start();
        if was_scanning {
            self.core.transport.stop_scan();
        }
        tracing::info!(generation, "scan started");
        self.core
            .transport
            .start_scan(SightingSink::new(self.core.mailbox.clone(), generation));
    }

    /// Stop scanning. Discovered peripherals remain queryable.
    pub fn stop_scan(&self) {
        if self.core.scan().stop() {
            self.core.transport.stop_scan();
            tracing::info!("scan stopped");
        }
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.core.scan().is_scanning()
    }

    /// Snapshot of discovered peripherals, strongest first.
    #[must_use]
    pub fn ranked_list(&self) -> Vec<Peripheral> {
        self.core.scan().registry().ranked_list()
    }

    /// Ranked list rendered as `address name strength` entries joined by `,`.
    #[must_use]
    pub fn device_list(&self) -> String {
        self.core.scan().registry().describe()
    }

    /// Peripheral at a 1-based position of the ranked list.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::Bounds`] when `position` is 0 or past the end.
    pub fn peripheral_at(&self, position: usize) -> Result<Peripheral, GattError> {
        Ok(self.core.scan().registry().get(position)?)
    }

    // ── Connections ──

    /// Connect to the peripheral at a 1-based position of the ranked list.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::Bounds`] when `position` is 0 or past the end.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn connect_by_position(&self, position: usize) -> Result<PeripheralAddress, GattError> {
        let peripheral = self.peripheral_at(position)?;
        self.connect_by_address(&peripheral.address);
        Ok(peripheral.address)
    }

    /// Connect to a peripheral by address.
    ///
    /// Does nothing if a session for that address already exists.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn connect_by_address(&self, address: &PeripheralAddress) {
        let opened = self.core.sessions().open(address);
        match opened {
            Some(session) => {
                tracing::info!(%address, %session, "connecting");
                self.core.transport.connect(
                    session,
                    address,
                    LinkSink::new(self.core.mailbox.clone(), session),
                );
            }
            None => tracing::debug!(%address, "session already exists"),
        }
    }

    /// Tear down the session for `address` and close the link.
    ///
    /// An outstanding operation is reported as [`GattError::ConnectionLost`]
    /// through the sink.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotFound`] when there is no session for `address`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn disconnect(&self, address: &PeripheralAddress) -> Result<(), GattError> {
        let removed = self.core.sessions().remove(address);
        let mut session = removed.ok_or_else(|| session_not_found(address))?;
        tracing::info!(%address, "disconnecting");
        self.core.emit(session.tear_down());
        self.core.transport.disconnect(address);
        Ok(())
    }

    #[must_use]
    pub fn connection_state(&self, address: &PeripheralAddress) -> ConnectionState {
        self.core
            .sessions()
            .get(address)
            .map_or(ConnectionState::Disconnected, GattSession::state)
    }

    /// Whether the link to `address` is up.
    #[must_use]
    pub fn is_connected(&self, address: &PeripheralAddress) -> bool {
        self.core
            .sessions()
            .get(address)
            .is_some_and(GattSession::is_connected)
    }

    /// Signal strength read when the link to `address` came up.
    #[must_use]
    pub fn connected_signal_strength(&self, address: &PeripheralAddress) -> Option<i16> {
        self.core
            .sessions()
            .get(address)
            .and_then(GattSession::signal_strength)
    }

    /// Addresses with a live or pending session.
    #[must_use]
    pub fn connected_addresses(&self) -> Vec<PeripheralAddress> {
        self.core.sessions().addresses()
    }

    // ── Characteristic operations ──

    /// Read a characteristic; the value arrives as a `*ValueRead` event.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`], [`GattError::OperationInProgress`] or
    /// [`GattError::NotFound`].
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn read(
        &self,
        address: &PeripheralAddress,
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    ) -> Result<(), GattError> {
        self.core
            .begin(address, |session| session.begin_read(characteristic, request))
    }

    /// Write a typed value; completion arrives as a `ValueWritten` event.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`], [`GattError::OperationInProgress`],
    /// [`GattError::NotFound`] or [`GattError::Encode`].
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn write(
        &self,
        address: &PeripheralAddress,
        characteristic: CharacteristicRef,
        value: WriteValue,
    ) -> Result<(), GattError> {
        self.core
            .begin(address, |session| session.begin_write(characteristic, &value))
    }

    /// Write an integer of `format` at `offset` into the characteristic value.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn write_int(
        &self,
        address: &PeripheralAddress,
        characteristic: CharacteristicRef,
        value: i64,
        format: IntFormat,
        offset: usize,
    ) -> Result<(), GattError> {
        self.write(
            address,
            characteristic,
            WriteValue::Int {
                value,
                format,
                offset,
            },
        )
    }

    /// Write UTF-8 text as the whole characteristic value.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn write_text(
        &self,
        address: &PeripheralAddress,
        characteristic: CharacteristicRef,
        text: &str,
    ) -> Result<(), GattError> {
        self.write(address, characteristic, WriteValue::Text(text.to_string()))
    }

    /// Enable push delivery; values arrive as `*ValueChanged` events decoded
    /// with `request`.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`], [`GattError::OperationInProgress`] or
    /// [`GattError::NotFound`].
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn subscribe(
        &self,
        address: &PeripheralAddress,
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    ) -> Result<(), GattError> {
        self.core.begin(address, |session| {
            session.begin_subscribe(characteristic, request)
        })
    }

    /// Disable push delivery.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn unsubscribe(
        &self,
        address: &PeripheralAddress,
        characteristic: CharacteristicRef,
    ) -> Result<(), GattError> {
        self.core
            .begin(address, |session| session.begin_unsubscribe(characteristic))
    }

    /// Set how future change notifications of a characteristic are decoded.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`] or [`GattError::NotFound`].
    pub fn configure_decode(
        &self,
        address: &PeripheralAddress,
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    ) -> Result<(), GattError> {
        let mut sessions = self.core.sessions();
        let session = sessions.get_mut(address).ok_or(NOT_CONNECTED)?;
        session.configure_decode(characteristic, request)
    }

    // ── Discovered tree ──

    /// Discovered services of a connected peripheral.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`] until discovery has finished.
    pub fn supported_services(
        &self,
        address: &PeripheralAddress,
    ) -> Result<Vec<GattService>, GattError> {
        self.core.inspect(address, |services| Ok(services.to_vec()))
    }

    /// Service at a 1-based position.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`] or [`GattError::Bounds`].
    pub fn service_at(
        &self,
        address: &PeripheralAddress,
        position: usize,
    ) -> Result<GattService, GattError> {
        self.core.inspect(address, |services| {
            Ok(gatt::service_at(services, position)?.clone())
        })
    }

    /// Every discovered characteristic, in discovery order across services.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`] until discovery has finished.
    pub fn supported_characteristics(
        &self,
        address: &PeripheralAddress,
    ) -> Result<Vec<GattCharacteristic>, GattError> {
        self.core.inspect(address, |services| {
            Ok(services
                .iter()
                .flat_map(|s| s.characteristics.iter().cloned())
                .collect())
        })
    }

    /// Characteristic at a 1-based position across all services.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`] or [`GattError::Bounds`].
    pub fn characteristic_at(
        &self,
        address: &PeripheralAddress,
        position: usize,
    ) -> Result<GattCharacteristic, GattError> {
        self.core.inspect(address, |services| {
            Ok(gatt::characteristic_at(services, position)?.clone())
        })
    }

    // ── Lifecycle ──

    /// Stop scanning, tear down every session, deliver the remaining events
    /// and stop the dispatcher.
    pub async fn shutdown(mut self) {
        self.stop_scan();
        let sessions = self.core.sessions().drain();
        for mut session in sessions {
            let address = session.address().clone();
            self.core.emit(session.tear_down());
            self.core.transport.disconnect(&address);
        }
        self.core.mailbox.post(Inbound::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.await {
                tracing::warn!(%err, "dispatcher task failed");
            }
        }
        tracing::info!("BLE engine stopped");
    }
}

impl<T: Transport> Drop for BleEngine<T> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
            tracing::debug!("dispatcher task aborted");
        }
    }
}

/// Error for characteristic operations on an address without a session.
const NOT_CONNECTED: GattError = GattError::NotReady {
    state: ConnectionState::Disconnected,
};

fn session_not_found(address: &PeripheralAddress) -> GattError {
    NotFoundError {
        entity: "Session",
        id: address.to_string(),
    }
    .into()
}

impl<T: Transport> EngineCore<T> {
    fn scan(&self) -> MutexGuard<'_, ScanController> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions(&self) -> MutexGuard<'_, SessionManager> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue caller-side events behind everything already in the mailbox.
    fn emit(&self, events: Vec<Event>) {
        for event in events {
            self.mailbox.post(Inbound::Emit(event));
        }
    }

    fn begin(
        &self,
        address: &PeripheralAddress,
        start: impl FnOnce(&mut GattSession) -> Result<Transition, GattError>,
    ) -> Result<(), GattError> {
        let (session, transition) = {
            let mut sessions = self.sessions();
            let session = sessions.get_mut(address).ok_or(NOT_CONNECTED)?;
            (session.id(), start(session)?)
        };
        self.execute(session, transition.commands);
        self.emit(transition.events);
        Ok(())
    }

    fn inspect<R>(
        &self,
        address: &PeripheralAddress,
        read: impl FnOnce(&[GattService]) -> Result<R, GattError>,
    ) -> Result<R, GattError> {
        let sessions = self.sessions();
        let session = sessions.get(address).ok_or(NOT_CONNECTED)?;
        if session.state() != ConnectionState::ServicesDiscovered {
            return Err(GattError::NotReady {
                state: session.state(),
            });
        }
        read(session.services())
    }

    // ── Dispatcher side ──

    fn handle(&self, message: Inbound) -> Vec<Event> {
        match message {
            Inbound::Sighting {
                generation,
                sighting,
            } => self.scan().on_sighting(generation, sighting),
            Inbound::ScanFailed { generation, error } => {
                if !self.scan().fail(generation) {
                    return Vec::new();
                }
                tracing::warn!(%error, "scan failed");
                vec![Event::Failure {
                    address: None,
                    operation: Operation::Scan,
                    error: error.into(),
                }]
            }
            Inbound::Link { session, event } => self.on_link(session, event),
            Inbound::Completed {
                session,
                token,
                outcome,
            } => self.on_completed(session, token, outcome),
            Inbound::Emit(event) => vec![event],
            Inbound::Shutdown => Vec::new(),
        }
    }

    fn on_link(&self, id: SessionId, event: LinkEvent) -> Vec<Event> {
        match event {
            LinkEvent::Connected => self.apply(id, GattSession::on_link_up),
            LinkEvent::ValueChanged {
                characteristic,
                value,
            } => self.apply(id, |session| session.on_value_changed(characteristic, value)),
            LinkEvent::Disconnected => {
                let removed = self.sessions().remove_by_id(id);
                let Some(mut session) = removed else {
                    return Vec::new();
                };
                tracing::info!(address = %session.address(), "link lost");
                session.tear_down()
            }
            LinkEvent::ConnectFailed(error) => {
                let removed = self.sessions().remove_by_id(id);
                let Some(mut session) = removed else {
                    return Vec::new();
                };
                tracing::warn!(address = %session.address(), %error, "connection attempt failed");
                let mut events = vec![Event::Failure {
                    address: Some(session.address().clone()),
                    operation: Operation::Connect,
                    error: error.into(),
                }];
                events.extend(session.tear_down());
                events
            }
        }
    }

    fn on_completed(&self, id: SessionId, token: OpToken, outcome: Outcome) -> Vec<Event> {
        self.apply(id, |session| match outcome {
            Outcome::Services(result) => session.on_services_discovered(token, result),
            Outcome::SignalStrength(result) => session.on_signal_strength(token, result),
            Outcome::Value(result) => session.on_read_complete(token, result),
            Outcome::Written(result) => session.on_write_complete(token, result),
        })
    }

    fn apply(&self, id: SessionId, input: impl FnOnce(&mut GattSession) -> Transition) -> Vec<Event> {
        let transition = {
            let mut sessions = self.sessions();
            let Some(session) = sessions.get_by_id_mut(id) else {
                tracing::debug!(session = %id, "dropping message for closed session");
                return Vec::new();
            };
            input(session)
        };
        self.execute(id, transition.commands);
        transition.events
    }

    fn execute(&self, session: SessionId, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::DiscoverServices { token } => self
                    .transport
                    .discover_services(session, self.completion(session, token)),
                Command::ReadSignalStrength { token } => self
                    .transport
                    .read_signal_strength(session, self.completion(session, token)),
                Command::ReadCharacteristic {
                    token,
                    characteristic,
                } => self.transport.read_characteristic(
                    session,
                    characteristic,
                    self.completion(session, token),
                ),
                Command::WriteCharacteristic {
                    token,
                    characteristic,
                    value,
                } => self.transport.write_characteristic(
                    session,
                    characteristic,
                    value,
                    self.completion(session, token),
                ),
                Command::WriteDescriptor {
                    token,
                    descriptor,
                    value,
                } => self.transport.write_descriptor(
                    session,
                    descriptor,
                    value,
                    self.completion(session, token),
                ),
            }
        }
    }

    fn completion<P: Payload>(&self, session: SessionId, token: OpToken) -> Completion<P> {
        Completion::new(self.mailbox.clone(), session, token)
    }
}

/// Dispatcher loop: the single context that mutates state in response to the
/// transport and delivers events.
async fn dispatch<T: Transport, S: EventSink>(
    core: Arc<EngineCore<T>>,
    mut inbox: mpsc::UnboundedReceiver<Inbound>,
    sink: S,
) {
    while let Some(message) = inbox.recv().await {
        if matches!(message, Inbound::Shutdown) {
            break;
        }
        for event in core.handle(message) {
            tracing::trace!(event = event.name(), "delivering event");
            if let Err(err) = sink.deliver(event).await {
                tracing::warn!(%err, "event sink failed to deliver event");
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}
