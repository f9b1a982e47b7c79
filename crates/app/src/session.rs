//! GATT session: per-peripheral connection state machine.
//!
//! ```text
//! Disconnected → Connecting → Connected → ServicesDiscovered
//!                    │            │               │
//!                    └────────────┴───────────────┴──→ Disconnected
//! ```
//!
//! A session never performs IO itself. Every input returns a [`Transition`]:
//! the transport [`Command`]s to issue and the [`Event`]s to deliver. The
//! engine executes commands outside its locks and forwards events to the sink
//! from the dispatcher.
//!
//! At most one characteristic operation (read, write, descriptor write) is
//! outstanding at a time. A second one fails with
//! [`GattError::OperationInProgress`] instead of being queued.

use std::collections::{HashMap, HashSet};

use gattlink_domain::codec::{DecodeRequest, WriteValue, decode};
use gattlink_domain::error::{GattError, NotFoundError, TransportError};
use gattlink_domain::event::{Event, Operation};
use gattlink_domain::gatt::{
    self, CharacteristicRef, ConnectionState, DISABLE_NOTIFICATION_VALUE, DescriptorRef,
    GattCharacteristic, GattService,
};
use gattlink_domain::id::{PeripheralAddress, SessionId};

use crate::mailbox::OpToken;

/// Transport call a session asks the engine to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    DiscoverServices {
        token: OpToken,
    },
    ReadSignalStrength {
        token: OpToken,
    },
    ReadCharacteristic {
        token: OpToken,
        characteristic: CharacteristicRef,
    },
    WriteCharacteristic {
        token: OpToken,
        characteristic: CharacteristicRef,
        value: Vec<u8>,
    },
    WriteDescriptor {
        token: OpToken,
        descriptor: DescriptorRef,
        value: Vec<u8>,
    },
}

/// Side effects of one session input.
#[derive(Debug, Default, PartialEq)]
pub struct Transition {
    pub commands: Vec<Command>,
    pub events: Vec<Event>,
}

impl Transition {
    fn command(command: Command) -> Self {
        Self {
            commands: vec![command],
            events: Vec::new(),
        }
    }

    fn event(event: Event) -> Self {
        Self {
            commands: Vec::new(),
            events: vec![event],
        }
    }

    /// Whether the input had no effect.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    /// Enabling push delivery before a read.
    Prime {
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    },
    Read {
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    },
    Write {
        characteristic: CharacteristicRef,
        value: Vec<u8>,
    },
    Subscribe {
        characteristic: CharacteristicRef,
    },
    Unsubscribe {
        characteristic: CharacteristicRef,
    },
}

impl PendingOp {
    fn operation(&self) -> Operation {
        match self {
            Self::Prime { characteristic, .. } | Self::Read { characteristic, .. } => {
                Operation::Read(*characteristic)
            }
            Self::Write { characteristic, .. } => Operation::Write(*characteristic),
            Self::Subscribe { characteristic } => Operation::Subscribe(*characteristic),
            Self::Unsubscribe { characteristic } => Operation::Unsubscribe(*characteristic),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    token: OpToken,
    op: PendingOp,
}

/// A live or pending connection to one peripheral.
#[derive(Debug)]
pub struct GattSession {
    id: SessionId,
    address: PeripheralAddress,
    state: ConnectionState,
    services: Vec<GattService>,
    pending: Option<Pending>,
    subscriptions: HashSet<CharacteristicRef>,
    /// Interpretation used for change notifications, per characteristic.
    decode_requests: HashMap<CharacteristicRef, DecodeRequest>,
    /// Last value read, written or pushed, per characteristic.
    last_values: HashMap<CharacteristicRef, Vec<u8>>,
    signal_strength: Option<i16>,
    discovery: Option<OpToken>,
    signal_read: Option<OpToken>,
    next_token: OpToken,
    prime_on_read: bool,
}

impl GattSession {
    /// Create a session for a connect request, in [`ConnectionState::Connecting`].
    #[must_use]
    pub fn new(address: PeripheralAddress, prime_on_read: bool) -> Self {
        Self {
            id: SessionId::new(),
            address,
            state: ConnectionState::Connecting,
            services: Vec::new(),
            pending: None,
            subscriptions: HashSet::new(),
            decode_requests: HashMap::new(),
            last_values: HashMap::new(),
            signal_strength: None,
            discovery: None,
            signal_read: None,
            next_token: OpToken::new(1),
            prime_on_read,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Discovered services, empty until discovery succeeds.
    #[must_use]
    pub fn services(&self) -> &[GattService] {
        &self.services
    }

    /// Signal strength from the read issued when the link came up.
    #[must_use]
    pub fn signal_strength(&self) -> Option<i16> {
        self.signal_strength
    }

    #[must_use]
    pub fn is_subscribed(&self, characteristic: &CharacteristicRef) -> bool {
        self.subscriptions.contains(characteristic)
    }

    #[must_use]
    pub fn has_pending_operation(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the link is up, whether or not discovery has finished.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::ServicesDiscovered
        )
    }

    // ── Link lifecycle ──

    /// The transport reports the link is established.
    ///
    /// Discovery and a signal strength read start immediately.
    pub fn on_link_up(&mut self) -> Transition {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(address = %self.address, state = %self.state, "ignoring duplicate link up");
            return Transition::default();
        }
        self.state = ConnectionState::Connected;
        let discovery = self.issue_token();
        let signal_read = self.issue_token();
        self.discovery = Some(discovery);
        self.signal_read = Some(signal_read);
        tracing::info!(address = %self.address, "link established, discovering services");
        Transition {
            commands: vec![
                Command::DiscoverServices { token: discovery },
                Command::ReadSignalStrength { token: signal_read },
            ],
            events: vec![Event::Connected {
                address: self.address.clone(),
            }],
        }
    }

    /// Discovery finished.
    pub fn on_services_discovered(
        &mut self,
        token: OpToken,
        result: Result<Vec<GattService>, TransportError>,
    ) -> Transition {
        if self.discovery != Some(token) {
            tracing::debug!(address = %self.address, %token, "ignoring stale discovery completion");
            return Transition::default();
        }
        self.discovery = None;
        match result {
            Ok(services) => {
                self.state = ConnectionState::ServicesDiscovered;
                let service_count = services.len();
                self.services = services;
                tracing::info!(address = %self.address, service_count, "services discovered");
                Transition::event(Event::ServicesDiscovered {
                    address: self.address.clone(),
                    service_count,
                })
            }
            Err(err) => {
                tracing::warn!(address = %self.address, %err, "service discovery failed");
                self.failure(Operation::Discover, err.into())
            }
        }
    }

    /// The signal strength read finished.
    pub fn on_signal_strength(
        &mut self,
        token: OpToken,
        result: Result<i16, TransportError>,
    ) -> Transition {
        if self.signal_read != Some(token) {
            return Transition::default();
        }
        self.signal_read = None;
        match result {
            Ok(signal_strength) => {
                self.signal_strength = Some(signal_strength);
                Transition::event(Event::SignalStrengthChanged {
                    address: self.address.clone(),
                    signal_strength,
                })
            }
            Err(err) => self.failure(Operation::SignalStrength, err.into()),
        }
    }

    /// Tear the session down after an explicit disconnect or link loss.
    ///
    /// An outstanding operation is reported as [`GattError::ConnectionLost`]
    /// and every subscription is dropped.
    pub fn tear_down(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if let Some(pending) = self.pending.take() {
            tracing::info!(address = %self.address, token = %pending.token, "failing outstanding operation");
            events.push(Event::Failure {
                address: Some(self.address.clone()),
                operation: pending.op.operation(),
                error: GattError::ConnectionLost,
            });
        }
        self.state = ConnectionState::Disconnected;
        self.subscriptions.clear();
        self.discovery = None;
        self.signal_read = None;
        events.push(Event::Disconnected {
            address: self.address.clone(),
        });
        events
    }

    // ── Characteristic operations ──

    /// Start a read.
    ///
    /// When priming is enabled and the characteristic has a client-configuration
    /// descriptor, push delivery is enabled first (indication if supported,
    /// notification otherwise) and the read follows. `request` also becomes the
    /// interpretation for later change notifications.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`], [`GattError::OperationInProgress`] or
    /// [`GattError::NotFound`]; no command is issued in that case.
    pub fn begin_read(
        &mut self,
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    ) -> Result<Transition, GattError> {
        self.ensure_idle()?;
        let found = self.characteristic(&characteristic)?;
        let priming = self
            .prime_on_read
            .then(|| found.client_configuration().map(|d| (d, found.enable_push_value())))
            .flatten();
        self.decode_requests.insert(characteristic, request);

        let token = self.issue_token();
        let (op, command) = match priming {
            Some((descriptor, value)) => (
                PendingOp::Prime {
                    characteristic,
                    request,
                },
                Command::WriteDescriptor {
                    token,
                    descriptor,
                    value: value.to_vec(),
                },
            ),
            None => (
                PendingOp::Read {
                    characteristic,
                    request,
                },
                Command::ReadCharacteristic {
                    token,
                    characteristic,
                },
            ),
        };
        self.pending = Some(Pending { token, op });
        Ok(Transition::command(command))
    }

    /// Start a write.
    ///
    /// Integer writes land at their offset inside the last known value of the
    /// characteristic; text replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`], [`GattError::OperationInProgress`],
    /// [`GattError::NotFound`] or [`GattError::Encode`].
    pub fn begin_write(
        &mut self,
        characteristic: CharacteristicRef,
        value: &WriteValue,
    ) -> Result<Transition, GattError> {
        self.ensure_idle()?;
        self.characteristic(&characteristic)?;
        let current = self
            .last_values
            .get(&characteristic)
            .map_or(&[][..], Vec::as_slice);
        let bytes = value.encode(current)?;

        let token = self.issue_token();
        self.pending = Some(Pending {
            token,
            op: PendingOp::Write {
                characteristic,
                value: bytes.clone(),
            },
        });
        Ok(Transition::command(Command::WriteCharacteristic {
            token,
            characteristic,
            value: bytes,
        }))
    }

    /// Enable push delivery for a characteristic and decode pushed values with
    /// `request`.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`], [`GattError::OperationInProgress`] or
    /// [`GattError::NotFound`] (also when there is no client-configuration
    /// descriptor).
    pub fn begin_subscribe(
        &mut self,
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    ) -> Result<Transition, GattError> {
        self.ensure_idle()?;
        let found = self.characteristic(&characteristic)?;
        let descriptor = found
            .client_configuration()
            .ok_or_else(|| missing_descriptor(&characteristic))?;
        let value = found.enable_push_value();
        self.decode_requests.insert(characteristic, request);

        let token = self.issue_token();
        self.pending = Some(Pending {
            token,
            op: PendingOp::Subscribe { characteristic },
        });
        Ok(Transition::command(Command::WriteDescriptor {
            token,
            descriptor,
            value: value.to_vec(),
        }))
    }

    /// Disable push delivery for a characteristic.
    ///
    /// # Errors
    ///
    /// Same as [`begin_subscribe`](Self::begin_subscribe).
    pub fn begin_unsubscribe(
        &mut self,
        characteristic: CharacteristicRef,
    ) -> Result<Transition, GattError> {
        self.ensure_idle()?;
        let descriptor = self
            .characteristic(&characteristic)?
            .client_configuration()
            .ok_or_else(|| missing_descriptor(&characteristic))?;

        let token = self.issue_token();
        self.pending = Some(Pending {
            token,
            op: PendingOp::Unsubscribe { characteristic },
        });
        Ok(Transition::command(Command::WriteDescriptor {
            token,
            descriptor,
            value: DISABLE_NOTIFICATION_VALUE.to_vec(),
        }))
    }

    /// Set the interpretation of future change notifications without any IO.
    ///
    /// # Errors
    ///
    /// Returns [`GattError::NotReady`] or [`GattError::NotFound`].
    pub fn configure_decode(
        &mut self,
        characteristic: CharacteristicRef,
        request: DecodeRequest,
    ) -> Result<(), GattError> {
        self.ensure_ready()?;
        self.characteristic(&characteristic)?;
        self.decode_requests.insert(characteristic, request);
        Ok(())
    }

    // ── Completions ──

    /// A characteristic read finished.
    pub fn on_read_complete(
        &mut self,
        token: OpToken,
        result: Result<Vec<u8>, TransportError>,
    ) -> Transition {
        let Some(op) = self.take_pending(token) else {
            return Transition::default();
        };
        let PendingOp::Read {
            characteristic,
            request,
        } = op
        else {
            tracing::warn!(address = %self.address, %token, "read completion for a non-read operation");
            return Transition::default();
        };
        match result {
            Ok(raw) => {
                let transition = self.decoded(characteristic, &raw, &request, false);
                self.last_values.insert(characteristic, raw);
                transition
            }
            Err(err) => self.failure(Operation::Read(characteristic), err.into()),
        }
    }

    /// A characteristic or descriptor write finished.
    pub fn on_write_complete(
        &mut self,
        token: OpToken,
        result: Result<(), TransportError>,
    ) -> Transition {
        let Some(op) = self.take_pending(token) else {
            return Transition::default();
        };
        match op {
            PendingOp::Prime {
                characteristic,
                request,
            } => {
                match result {
                    Ok(()) => {
                        self.subscriptions.insert(characteristic);
                    }
                    Err(err) => {
                        tracing::warn!(address = %self.address, %characteristic, %err, "enabling push delivery failed, reading anyway");
                    }
                }
                let token = self.issue_token();
                self.pending = Some(Pending {
                    token,
                    op: PendingOp::Read {
                        characteristic,
                        request,
                    },
                });
                Transition::command(Command::ReadCharacteristic {
                    token,
                    characteristic,
                })
            }
            PendingOp::Write {
                characteristic,
                value,
            } => match result {
                Ok(()) => {
                    self.last_values.insert(characteristic, value);
                    Transition::event(Event::ValueWritten {
                        address: self.address.clone(),
                        characteristic,
                    })
                }
                Err(err) => self.failure(Operation::Write(characteristic), err.into()),
            },
            PendingOp::Subscribe { characteristic } => match result {
                Ok(()) => {
                    self.subscriptions.insert(characteristic);
                    tracing::debug!(address = %self.address, %characteristic, "subscribed");
                    Transition::default()
                }
                Err(err) => self.failure(Operation::Subscribe(characteristic), err.into()),
            },
            PendingOp::Unsubscribe { characteristic } => match result {
                Ok(()) => {
                    self.subscriptions.remove(&characteristic);
                    tracing::debug!(address = %self.address, %characteristic, "unsubscribed");
                    Transition::default()
                }
                Err(err) => self.failure(Operation::Unsubscribe(characteristic), err.into()),
            },
            PendingOp::Read { .. } => {
                tracing::warn!(address = %self.address, %token, "write completion for a read operation");
                Transition::default()
            }
        }
    }

    /// The peripheral pushed a value.
    pub fn on_value_changed(&mut self, characteristic: CharacteristicRef, raw: Vec<u8>) -> Transition {
        if self.state != ConnectionState::ServicesDiscovered {
            tracing::debug!(address = %self.address, %characteristic, "ignoring notification before discovery");
            return Transition::default();
        }
        let request = self
            .decode_requests
            .get(&characteristic)
            .copied()
            .unwrap_or_default();
        let transition = self.decoded(characteristic, &raw, &request, true);
        self.last_values.insert(characteristic, raw);
        transition
    }

    // ── Internals ──

    fn decoded(
        &self,
        characteristic: CharacteristicRef,
        raw: &[u8],
        request: &DecodeRequest,
        pushed: bool,
    ) -> Transition {
        match decode(raw, request) {
            Ok(value) => {
                let address = self.address.clone();
                Transition::event(if pushed {
                    Event::ValueChanged {
                        address,
                        characteristic,
                        value,
                    }
                } else {
                    Event::ValueRead {
                        address,
                        characteristic,
                        value,
                    }
                })
            }
            Err(err) => {
                tracing::debug!(address = %self.address, %characteristic, %err, "decode failed");
                let operation = if pushed {
                    Operation::Changed(characteristic)
                } else {
                    Operation::Read(characteristic)
                };
                self.failure(operation, err.into())
            }
        }
    }

    fn failure(&self, operation: Operation, error: GattError) -> Transition {
        Transition::event(Event::Failure {
            address: Some(self.address.clone()),
            operation,
            error,
        })
    }

    fn take_pending(&mut self, token: OpToken) -> Option<PendingOp> {
        match self.pending.take() {
            Some(pending) if pending.token == token => Some(pending.op),
            other => {
                tracing::debug!(address = %self.address, %token, "ignoring stale completion");
                self.pending = other;
                None
            }
        }
    }

    fn ensure_ready(&self) -> Result<(), GattError> {
        if self.state == ConnectionState::ServicesDiscovered {
            Ok(())
        } else {
            Err(GattError::NotReady { state: self.state })
        }
    }

    fn ensure_idle(&self) -> Result<(), GattError> {
        self.ensure_ready()?;
        if self.pending.is_some() {
            return Err(GattError::OperationInProgress);
        }
        Ok(())
    }

    fn characteristic(
        &self,
        characteristic: &CharacteristicRef,
    ) -> Result<&GattCharacteristic, GattError> {
        gatt::find_characteristic(&self.services, characteristic).ok_or_else(|| {
            NotFoundError {
                entity: "Characteristic",
                id: characteristic.to_string(),
            }
            .into()
        })
    }

    fn issue_token(&mut self) -> OpToken {
        let token = self.next_token;
        self.next_token = token.next();
        token
    }
}

fn missing_descriptor(characteristic: &CharacteristicRef) -> GattError {
    NotFoundError {
        entity: "Client configuration descriptor",
        id: characteristic.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_domain::codec::{DecodedValue, IntFormat};
    use gattlink_domain::error::{DecodeError, EncodeError};
    use gattlink_domain::gatt::{
        CLIENT_CHARACTERISTIC_CONFIGURATION, CharacteristicProperties, ENABLE_INDICATION_VALUE,
        ENABLE_NOTIFICATION_VALUE, GattDescriptor,
    };
    use uuid::Uuid;

    const SERVICE: Uuid = Uuid::from_u128(0x180F);
    const PLAIN: Uuid = Uuid::from_u128(0x2A19);
    const NOTIFYING: Uuid = Uuid::from_u128(0x2A6E);
    const INDICATING: Uuid = Uuid::from_u128(0x2A1C);

    fn plain() -> CharacteristicRef {
        CharacteristicRef::new(SERVICE, PLAIN)
    }

    fn notifying() -> CharacteristicRef {
        CharacteristicRef::new(SERVICE, NOTIFYING)
    }

    fn indicating() -> CharacteristicRef {
        CharacteristicRef::new(SERVICE, INDICATING)
    }

    fn services() -> Vec<GattService> {
        let cccd = vec![GattDescriptor {
            uuid: CLIENT_CHARACTERISTIC_CONFIGURATION,
        }];
        vec![GattService {
            uuid: SERVICE,
            characteristics: vec![
                GattCharacteristic {
                    uuid: PLAIN,
                    service: SERVICE,
                    properties: CharacteristicProperties::from_bits(
                        CharacteristicProperties::READ | CharacteristicProperties::WRITE,
                    ),
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: NOTIFYING,
                    service: SERVICE,
                    properties: CharacteristicProperties::from_bits(
                        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
                    ),
                    descriptors: cccd.clone(),
                },
                GattCharacteristic {
                    uuid: INDICATING,
                    service: SERVICE,
                    properties: CharacteristicProperties::from_bits(
                        CharacteristicProperties::INDICATE,
                    ),
                    descriptors: cccd,
                },
            ],
        }]
    }

    fn token_of(command: &Command) -> OpToken {
        match command {
            Command::DiscoverServices { token }
            | Command::ReadSignalStrength { token }
            | Command::ReadCharacteristic { token, .. }
            | Command::WriteCharacteristic { token, .. }
            | Command::WriteDescriptor { token, .. } => *token,
        }
    }

    fn ready_session(prime_on_read: bool) -> GattSession {
        let mut session = GattSession::new("AA:01".into(), prime_on_read);
        let up = session.on_link_up();
        let discovery = token_of(&up.commands[0]);
        session.on_services_discovered(discovery, Ok(services()));
        session
    }

    // ── Lifecycle ──

    #[test]
    fn should_discover_and_read_signal_strength_when_link_comes_up() {
        let mut session = GattSession::new("AA:01".into(), true);
        assert_eq!(session.state(), ConnectionState::Connecting);

        let transition = session.on_link_up();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(matches!(transition.commands[0], Command::DiscoverServices { .. }));
        assert!(matches!(transition.commands[1], Command::ReadSignalStrength { .. }));
        assert_eq!(
            transition.events,
            vec![Event::Connected {
                address: "AA:01".into()
            }]
        );

        let signal = session.on_signal_strength(token_of(&transition.commands[1]), Ok(-42));
        assert_eq!(session.signal_strength(), Some(-42));
        assert_eq!(signal.events.len(), 1);

        let discovered =
            session.on_services_discovered(token_of(&transition.commands[0]), Ok(services()));
        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
        assert_eq!(
            discovered.events,
            vec![Event::ServicesDiscovered {
                address: "AA:01".into(),
                service_count: 1
            }]
        );
    }

    #[test]
    fn should_ignore_duplicate_link_up() {
        let mut session = ready_session(true);
        assert!(session.on_link_up().is_empty());
        assert_eq!(session.state(), ConnectionState::ServicesDiscovered);
    }

    #[test]
    fn should_report_failed_discovery_and_stay_connected() {
        let mut session = GattSession::new("AA:01".into(), true);
        let up = session.on_link_up();
        let transition = session.on_services_discovered(
            token_of(&up.commands[0]),
            Err(TransportError::new("gatt 133")),
        );
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(matches!(
            transition.events[0],
            Event::Failure {
                operation: Operation::Discover,
                error: GattError::Transport(_),
                ..
            }
        ));
    }

    #[test]
    fn should_tell_signal_strength_failure_from_read_failure() {
        let mut session = GattSession::new("AA:01".into(), false);
        let up = session.on_link_up();
        let signal = session.on_signal_strength(
            token_of(&up.commands[1]),
            Err(TransportError::new("boom")),
        );
        session.on_services_discovered(token_of(&up.commands[0]), Ok(services()));
        let read = session.begin_read(plain(), DecodeRequest::bytes()).unwrap();
        let failed = session.on_read_complete(
            token_of(&read.commands[0]),
            Err(TransportError::new("boom")),
        );

        let error = GattError::Transport(TransportError::new("boom"));
        assert_eq!(
            signal.events,
            vec![Event::Failure {
                address: Some("AA:01".into()),
                operation: Operation::SignalStrength,
                error: error.clone()
            }]
        );
        assert_eq!(
            failed.events,
            vec![Event::Failure {
                address: Some("AA:01".into()),
                operation: Operation::Read(plain()),
                error
            }]
        );
    }

    #[test]
    fn should_fail_pending_operation_with_connection_lost_on_tear_down() {
        let mut session = ready_session(false);
        session.begin_read(plain(), DecodeRequest::bytes()).unwrap();

        let events = session.tear_down();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.has_pending_operation());
        assert_eq!(
            events,
            vec![
                Event::Failure {
                    address: Some("AA:01".into()),
                    operation: Operation::Read(plain()),
                    error: GattError::ConnectionLost
                },
                Event::Disconnected {
                    address: "AA:01".into()
                }
            ]
        );
    }

    // ── Readiness and serialization ──

    #[test]
    fn should_reject_operations_before_discovery_without_commands() {
        let mut session = GattSession::new("AA:01".into(), true);
        assert_eq!(
            session.begin_read(plain(), DecodeRequest::bytes()),
            Err(GattError::NotReady {
                state: ConnectionState::Connecting
            })
        );
        session.on_link_up();
        assert_eq!(
            session.begin_write(plain(), &WriteValue::Text("x".into())),
            Err(GattError::NotReady {
                state: ConnectionState::Connected
            })
        );
        assert!(!session.has_pending_operation());
    }

    #[test]
    fn should_reject_second_operation_and_still_complete_first() {
        let mut session = ready_session(false);
        let first = session
            .begin_read(plain(), DecodeRequest::int(IntFormat::U8, 0))
            .unwrap();

        assert_eq!(
            session.begin_read(notifying(), DecodeRequest::bytes()),
            Err(GattError::OperationInProgress)
        );
        assert_eq!(
            session.begin_write(plain(), &WriteValue::Text("x".into())),
            Err(GattError::OperationInProgress)
        );

        let done = session.on_read_complete(token_of(&first.commands[0]), Ok(vec![42]));
        assert_eq!(
            done.events,
            vec![Event::ValueRead {
                address: "AA:01".into(),
                characteristic: plain(),
                value: DecodedValue::Int(42)
            }]
        );
        assert!(!session.has_pending_operation());
    }

    #[test]
    fn should_report_unknown_characteristic() {
        let mut session = ready_session(true);
        let unknown = CharacteristicRef::new(SERVICE, Uuid::from_u128(0xFFFF));
        assert!(matches!(
            session.begin_read(unknown, DecodeRequest::bytes()),
            Err(GattError::NotFound(_))
        ));
        assert!(!session.has_pending_operation());
    }

    #[test]
    fn should_ignore_stale_completion_tokens() {
        let mut session = ready_session(false);
        let read = session.begin_read(plain(), DecodeRequest::bytes()).unwrap();
        let token = token_of(&read.commands[0]);

        assert!(session.on_read_complete(token.next(), Ok(vec![1])).is_empty());
        assert!(session.has_pending_operation());
        assert!(!session.on_read_complete(token, Ok(vec![1])).is_empty());
    }

    // ── Reads ──

    #[test]
    fn should_prime_notifications_before_reading() {
        let mut session = ready_session(true);
        let request = DecodeRequest::int(IntFormat::U16, 0);
        let prime = session.begin_read(notifying(), request).unwrap();
        let Command::WriteDescriptor {
            token, descriptor, value,
        } = &prime.commands[0]
        else {
            panic!("expected descriptor write, got {:?}", prime.commands);
        };
        assert_eq!(descriptor.characteristic, notifying());
        assert_eq!(value, &ENABLE_NOTIFICATION_VALUE.to_vec());

        let read = session.on_write_complete(*token, Ok(()));
        assert!(session.is_subscribed(&notifying()));
        assert!(matches!(
            read.commands[0],
            Command::ReadCharacteristic { characteristic, .. } if characteristic == notifying()
        ));

        let done = session.on_read_complete(token_of(&read.commands[0]), Ok(vec![0x34, 0x12]));
        assert!(matches!(
            done.events[0],
            Event::ValueRead {
                value: DecodedValue::Int(0x1234),
                ..
            }
        ));
    }

    #[test]
    fn should_prime_with_indication_when_supported() {
        let mut session = ready_session(true);
        let prime = session.begin_read(indicating(), DecodeRequest::bytes()).unwrap();
        assert!(matches!(
            &prime.commands[0],
            Command::WriteDescriptor { value, .. } if value == &ENABLE_INDICATION_VALUE.to_vec()
        ));
    }

    #[test]
    fn should_read_even_when_priming_fails() {
        let mut session = ready_session(true);
        let prime = session.begin_read(notifying(), DecodeRequest::bytes()).unwrap();
        let read = session.on_write_complete(
            token_of(&prime.commands[0]),
            Err(TransportError::new("write not permitted")),
        );
        assert!(!session.is_subscribed(&notifying()));
        assert!(matches!(read.commands[0], Command::ReadCharacteristic { .. }));
    }

    #[test]
    fn should_read_directly_when_priming_is_disabled() {
        let mut session = ready_session(false);
        let read = session.begin_read(notifying(), DecodeRequest::bytes()).unwrap();
        assert!(matches!(read.commands[0], Command::ReadCharacteristic { .. }));
    }

    #[test]
    fn should_report_decode_error_on_short_buffer() {
        let mut session = ready_session(false);
        let read = session
            .begin_read(plain(), DecodeRequest::int(IntFormat::U32, 0))
            .unwrap();
        let done = session.on_read_complete(token_of(&read.commands[0]), Ok(vec![1, 2]));
        assert!(matches!(
            done.events[0],
            Event::Failure {
                operation: Operation::Read(c),
                error: GattError::Decode(DecodeError::OutOfBounds { .. }),
                ..
            } if c == plain()
        ));
    }

    #[test]
    fn should_attribute_decode_error_on_pushed_value_to_change() {
        let mut session = ready_session(false);
        session
            .configure_decode(notifying(), DecodeRequest::int(IntFormat::U32, 0))
            .unwrap();
        let changed = session.on_value_changed(notifying(), vec![1]);
        assert!(matches!(
            changed.events[0],
            Event::Failure {
                operation: Operation::Changed(c),
                error: GattError::Decode(_),
                ..
            } if c == notifying()
        ));
    }

    // ── Change notifications ──

    #[test]
    fn should_decode_changes_with_last_configured_request() {
        let mut session = ready_session(false);
        let raw = vec![0x01, 0x02];

        let changed = session.on_value_changed(notifying(), raw.clone());
        assert!(matches!(
            &changed.events[0],
            Event::ValueChanged { value: DecodedValue::Bytes(b), .. } if b == &raw
        ));

        session
            .configure_decode(notifying(), DecodeRequest::int(IntFormat::U8, 1))
            .unwrap();
        let changed = session.on_value_changed(notifying(), raw);
        assert!(matches!(
            changed.events[0],
            Event::ValueChanged {
                value: DecodedValue::Int(2),
                ..
            }
        ));
    }

    #[test]
    fn should_subscribe_and_unsubscribe() {
        let mut session = ready_session(true);
        let subscribe = session
            .begin_subscribe(indicating(), DecodeRequest::utf8())
            .unwrap();
        assert!(session
            .on_write_complete(token_of(&subscribe.commands[0]), Ok(()))
            .is_empty());
        assert!(session.is_subscribed(&indicating()));

        let changed = session.on_value_changed(indicating(), b"hi".to_vec());
        assert_eq!(changed.events[0].name(), "StringValueChanged");

        let unsubscribe = session.begin_unsubscribe(indicating()).unwrap();
        assert!(matches!(
            &unsubscribe.commands[0],
            Command::WriteDescriptor { value, .. } if value == &DISABLE_NOTIFICATION_VALUE.to_vec()
        ));
        session.on_write_complete(token_of(&unsubscribe.commands[0]), Ok(()));
        assert!(!session.is_subscribed(&indicating()));
    }

    #[test]
    fn should_refuse_subscription_without_descriptor() {
        let mut session = ready_session(true);
        assert!(matches!(
            session.begin_subscribe(plain(), DecodeRequest::bytes()),
            Err(GattError::NotFound(_))
        ));
    }

    // ── Writes ──

    #[test]
    fn should_emit_value_written_exactly_once() {
        let mut session = ready_session(true);
        let write = session
            .begin_write(plain(), &WriteValue::Text("on".into()))
            .unwrap();
        let token = token_of(&write.commands[0]);
        assert!(matches!(
            &write.commands[0],
            Command::WriteCharacteristic { value, .. } if value == b"on"
        ));

        let done = session.on_write_complete(token, Ok(()));
        assert_eq!(
            done.events,
            vec![Event::ValueWritten {
                address: "AA:01".into(),
                characteristic: plain()
            }]
        );
        assert!(session.on_write_complete(token, Ok(())).is_empty());
    }

    #[test]
    fn should_overlay_integer_write_on_last_read_value() {
        let mut session = ready_session(false);
        let read = session.begin_read(plain(), DecodeRequest::bytes()).unwrap();
        session.on_read_complete(token_of(&read.commands[0]), Ok(vec![1, 2, 3, 4]));

        let write = session
            .begin_write(
                plain(),
                &WriteValue::Int {
                    value: 0xFF,
                    format: IntFormat::U8,
                    offset: 2,
                },
            )
            .unwrap();
        assert!(matches!(
            &write.commands[0],
            Command::WriteCharacteristic { value, .. } if value == &vec![1, 2, 0xFF, 4]
        ));
    }

    #[test]
    fn should_reject_out_of_range_integer_write() {
        let mut session = ready_session(false);
        let result = session.begin_write(
            plain(),
            &WriteValue::Int {
                value: 70_000,
                format: IntFormat::U16,
                offset: 0,
            },
        );
        assert!(matches!(result, Err(GattError::Encode(_))));
        assert!(!session.has_pending_operation());
    }

    #[test]
    fn should_reject_integer_write_at_unreachable_offset() {
        let mut session = ready_session(false);
        let result = session.begin_write(
            plain(),
            &WriteValue::Int {
                value: 1,
                format: IntFormat::U8,
                offset: usize::MAX,
            },
        );
        assert_eq!(
            result,
            Err(GattError::Encode(EncodeError::OffsetOutOfRange {
                offset: usize::MAX,
                width: 1
            }))
        );
        assert!(!session.has_pending_operation());
    }
}
