//! Mailbox: the single marshaling point between transport callbacks and the
//! engine's dispatcher.
//!
//! Transport handles ([`Completion`], [`SightingSink`], [`LinkSink`]) post
//! [`Inbound`] messages into one unbounded channel. The dispatcher drains it
//! in order, so every state transition and every event happens on one task.

use std::fmt;
use std::marker::PhantomData;

use tokio::sync::mpsc;

use gattlink_domain::error::TransportError;
use gattlink_domain::event::Event;
use gattlink_domain::gatt::{CharacteristicRef, GattService};
use gattlink_domain::id::SessionId;

use crate::ports::transport::{LinkEvent, Sighting};

/// Identifies one asynchronous operation within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpToken(u64);

impl OpToken {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The token following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result carried by a [`Completion`].
#[derive(Debug)]
pub enum Outcome {
    Services(Result<Vec<GattService>, TransportError>),
    Value(Result<Vec<u8>, TransportError>),
    Written(Result<(), TransportError>),
    SignalStrength(Result<i16, TransportError>),
}

/// Payload types a [`Completion`] can carry.
pub trait Payload: Sized {
    #[doc(hidden)]
    fn into_outcome(result: Result<Self, TransportError>) -> Outcome;
}

impl Payload for Vec<GattService> {
    fn into_outcome(result: Result<Self, TransportError>) -> Outcome {
        Outcome::Services(result)
    }
}

impl Payload for Vec<u8> {
    fn into_outcome(result: Result<Self, TransportError>) -> Outcome {
        Outcome::Value(result)
    }
}

impl Payload for () {
    fn into_outcome(result: Result<Self, TransportError>) -> Outcome {
        Outcome::Written(result)
    }
}

impl Payload for i16 {
    fn into_outcome(result: Result<Self, TransportError>) -> Outcome {
        Outcome::SignalStrength(result)
    }
}

/// Message handled by the dispatcher.
#[derive(Debug)]
pub enum Inbound {
    Sighting {
        generation: u64,
        sighting: Sighting,
    },
    ScanFailed {
        generation: u64,
        error: TransportError,
    },
    Link {
        session: SessionId,
        event: LinkEvent,
    },
    Completed {
        session: SessionId,
        token: OpToken,
        outcome: Outcome,
    },
    /// An event produced by a caller operation, queued behind everything
    /// already in the mailbox.
    Emit(Event),
    Shutdown,
}

/// Sending half of the dispatcher's channel.
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: mpsc::UnboundedSender<Inbound>,
}

impl Mailbox {
    /// Create a mailbox and the receiver the dispatcher drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Post a message. Messages posted after shutdown are dropped.
    pub fn post(&self, message: Inbound) {
        if self.sender.send(message).is_err() {
            tracing::debug!("engine stopped, dropping inbound message");
        }
    }
}

/// One-shot completion handle for a transport operation.
///
/// Consumed by [`complete`](Self::complete), so it cannot fire twice. Dropping
/// it unfired reports a transport failure, so it always fires once.
pub struct Completion<T: Payload> {
    mailbox: Option<Mailbox>,
    session: SessionId,
    token: OpToken,
    _payload: PhantomData<fn(T)>,
}

impl<T: Payload> Completion<T> {
    pub(crate) fn new(mailbox: Mailbox, session: SessionId, token: OpToken) -> Self {
        Self {
            mailbox: Some(mailbox),
            session,
            token,
            _payload: PhantomData,
        }
    }

    /// Session the operation belongs to.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Report the operation's result.
    pub fn complete(mut self, result: Result<T, TransportError>) {
        self.fire(result);
    }

    fn fire(&mut self, result: Result<T, TransportError>) {
        if let Some(mailbox) = self.mailbox.take() {
            mailbox.post(Inbound::Completed {
                session: self.session,
                token: self.token,
                outcome: T::into_outcome(result),
            });
        }
    }
}

impl<T: Payload> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.mailbox.is_some() {
            tracing::debug!(session = %self.session, token = %self.token, "completion dropped unfired");
            self.fire(Err(TransportError::new("operation abandoned by transport")));
        }
    }
}

impl<T: Payload> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("session", &self.session)
            .field("token", &self.token)
            .field("fired", &self.mailbox.is_none())
            .finish()
    }
}

/// Receives advertisements for one scan.
///
/// Sightings from a scan that has since been stopped or restarted are ignored.
#[derive(Debug, Clone)]
pub struct SightingSink {
    mailbox: Mailbox,
    generation: u64,
}

impl SightingSink {
    pub(crate) fn new(mailbox: Mailbox, generation: u64) -> Self {
        Self {
            mailbox,
            generation,
        }
    }

    /// Report one advertisement.
    pub fn sighted(&self, sighting: Sighting) {
        self.mailbox.post(Inbound::Sighting {
            generation: self.generation,
            sighting,
        });
    }

    /// Report that the scan could not run.
    pub fn failed(&self, error: TransportError) {
        self.mailbox.post(Inbound::ScanFailed {
            generation: self.generation,
            error,
        });
    }
}

/// Receives link events for one session.
#[derive(Debug, Clone)]
pub struct LinkSink {
    mailbox: Mailbox,
    session: SessionId,
}

impl LinkSink {
    pub(crate) fn new(mailbox: Mailbox, session: SessionId) -> Self {
        Self { mailbox, session }
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn connected(&self) {
        self.send(LinkEvent::Connected);
    }

    pub fn disconnected(&self) {
        self.send(LinkEvent::Disconnected);
    }

    pub fn connect_failed(&self, error: TransportError) {
        self.send(LinkEvent::ConnectFailed(error));
    }

    pub fn value_changed(&self, characteristic: CharacteristicRef, value: Vec<u8>) {
        self.send(LinkEvent::ValueChanged {
            characteristic,
            value,
        });
    }

    fn send(&self, event: LinkEvent) {
        self.mailbox.post(Inbound::Link {
            session: self.session,
            event,
        });
    }
}
