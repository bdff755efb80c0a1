//! The event types the queue admits and carries.

use autotel_subscriber::{Attributes, AutotelContext};

/// An immutable event produced by traced code, before the queue has
/// annotated it with correlation and trace context.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The event name. Must be non-empty; validated at admission.
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The attribute mapping attached to the event.
    pub attributes: Attributes,
}

impl Event {
    /// Creates a new event with the given name, timestamp, and attributes.
    pub fn new(name: impl Into<String>, timestamp: i64, attributes: Attributes) -> Self {
        Self {
            name: name.into(),
            timestamp,
            attributes,
        }
    }
}

/// An [`Event`] augmented at admission time with correlation/trace context.
///
/// Once constructed, `name`, `attributes`, and `timestamp` are never edited
/// by the queue — only the bookkeeping the queue itself needs (its position
/// in delivery, not shown here) changes as the event moves through the
/// pipeline.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// A monotonically increasing id assigned at admission, used only to
    /// correlate log lines and test assertions; it has no meaning to
    /// subscribers.
    pub id: u64,
    /// The original, immutable event.
    pub event: Event,
    /// The trace/correlation context captured at admission time.
    pub context: AutotelContext,
}

impl QueuedEvent {
    pub(crate) fn new(id: u64, event: Event, context: AutotelContext) -> Self {
        Self { id, event, context }
    }
}
