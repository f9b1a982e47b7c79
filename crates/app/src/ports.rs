//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the engine and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod event_sink;
pub mod transport;

pub use event_sink::{EventSink, SinkError};
pub use transport::{LinkEvent, Sighting, Transport};
