//! Event sink port: where the engine reports state changes and values.

use std::future::Future;

use gattlink_domain::event::Event;

/// Failure reported by a sink; the engine logs it and carries on.
#[derive(Debug, thiserror::Error)]
#[error("event sink failed")]
pub struct SinkError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// Receives engine events, one at a time, in delivery order.
///
/// Implemented by the host. The engine awaits each delivery before handling
/// the next inbound message, so a slow sink applies backpressure rather than
/// reordering.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn deliver(&self, event: Event) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<T: EventSink> EventSink for std::sync::Arc<T> {
    fn deliver(&self, event: Event) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).deliver(event)
    }
}
