//! Common error types used across the workspace.
//!
//! [`GattError`] is the single error taxonomy surfaced to callers and carried
//! on the event sink's failure channel. Each kind has its own typed payload and
//! converts into [`GattError`] via `#[from]`.

use std::fmt;

use crate::codec::format::IntFormat;
use crate::gatt::ConnectionState;

/// Top-level error for every engine operation.
///
/// Errors are `Clone` so they can travel inside [`Event::Failure`](crate::event::Event::Failure).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GattError {
    /// A 1-based position fell outside the list it indexes.
    #[error("position out of bounds")]
    Bounds(#[from] BoundsError),

    /// The session has not reached the state the operation requires.
    #[error("session not ready (state: {state})")]
    NotReady {
        /// State the session was in when the operation was attempted.
        state: ConnectionState,
    },

    /// The session already has an outstanding operation.
    #[error("an operation is already in progress on this session")]
    OperationInProgress,

    /// The link dropped, possibly while an operation was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// The addressed peripheral, service or characteristic is unknown.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// A received buffer could not be interpreted with the requested format.
    #[error("decode error")]
    Decode(#[from] DecodeError),

    /// A value could not be encoded with the requested format.
    #[error("encode error")]
    Encode(#[from] EncodeError),

    /// Opaque failure reported by the platform transport.
    #[error("transport error")]
    Transport(#[from] TransportError),
}

/// Which caller-facing list a position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// The ranked device list.
    Devices,
    /// The discovered services of a session.
    Services,
    /// The discovered characteristics of a session (flattened across services).
    Characteristics,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Devices => "device",
            Self::Services => "service",
            Self::Characteristics => "characteristic",
        })
    }
}

/// A 1-based position was zero or past the end of its list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{list} position {position} is out of range (list has {len} entries)")]
pub struct BoundsError {
    /// List being indexed.
    pub list: ListKind,
    /// Requested 1-based position.
    pub position: usize,
    /// Length of the list at the time of the lookup.
    pub len: usize,
}

/// Returned when a lookup by identity finds nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} not found: {id}")]
pub struct NotFoundError {
    /// Kind of thing that was looked up (e.g. "Session", "Characteristic").
    pub entity: &'static str,
    /// Identifier that was searched for.
    pub id: String,
}

/// Details about why a raw buffer could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A fixed-width field does not fit in the buffer.
    #[error("{width}-byte value at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds {
        /// Requested offset.
        offset: usize,
        /// Width of the format.
        width: usize,
        /// Buffer length.
        len: usize,
    },

    /// The offset points past the end of the buffer.
    #[error("offset {offset} is past the end of a {len}-byte buffer")]
    OffsetPastEnd {
        /// Requested offset.
        offset: usize,
        /// Buffer length.
        len: usize,
    },

    /// No bytes are available to select a float encoding from.
    #[error("no bytes available at offset {offset} to decode a float")]
    NoFloatBytes {
        /// Requested offset.
        offset: usize,
    },

    /// The bytes from the offset are not valid UTF-8.
    #[error("invalid UTF-8 after {valid_up_to} valid bytes from offset {offset}")]
    InvalidUtf8 {
        /// Requested offset.
        offset: usize,
        /// Number of valid bytes before the first invalid sequence.
        valid_up_to: usize,
    },

    /// A composite frame is missing its leading mask byte.
    #[error("frame is empty, expected a leading mask byte")]
    EmptyFrame,
}

/// Details about why a value could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The value does not fit the integer format.
    #[error("value {value} does not fit in {format}")]
    OutOfRange {
        /// Value that was supplied.
        value: i64,
        /// Target format.
        format: IntFormat,
    },
    /// The field would end past the longest attribute value a peripheral accepts.
    #[error("field of {width} bytes at offset {offset} ends past the attribute length limit")]
    OffsetOutOfRange {
        /// Requested byte offset.
        offset: usize,
        /// Width of the encoded field.
        width: usize,
    },
}

/// Opaque failure surfaced by the platform layer (e.g. failed connect attempt).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Wrap a platform failure description.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The platform-provided description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
