#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The contract the event delivery queue uses to hand one event to one
//! downstream sink.
//!
//! The core makes no assumption about what a subscriber does with an event
//! (HTTP post, local buffer, SDK call) — subscribers own their internal
//! flushing and must be safe to call concurrently.

use std::collections::HashMap;

use async_trait::async_trait;

/// A primitive-or-string attribute value attached to an event.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AttributeValue {
    /// A boolean value.
    Bool(bool),
    /// A signed integer value.
    Int(i64),
    /// A floating point value.
    Float(f64),
    /// A string value.
    String(String),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

/// The attribute mapping carried by an event.
pub type Attributes = HashMap<String, AttributeValue>;

/// The trace/correlation context forwarded opaquely to subscribers.
///
/// The queue fills this in at admission time (correlation id via
/// `autotel-context`, trace id from whatever trace is active); subscribers
/// treat it as read-only join material, never as something to interpret.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutotelContext {
    /// The correlation id ambient at the moment the event was enqueued.
    pub correlation_id: String,
    /// The id of the trace active at enqueue time, if any.
    pub trace_id: Option<String>,
}

impl AutotelContext {
    /// Creates a new context with the given correlation id and no trace.
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            trace_id: None,
        }
    }

    /// Attaches a trace id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

/// The detail of a failed delivery attempt.
///
/// The core never introspects this beyond logging it: retry policy treats
/// every failure identically regardless of whether the underlying cause was
/// transient or permanent.
#[derive(thiserror::Error, Debug, Clone)]
#[error("subscriber delivery failed: {detail}")]
pub struct SubscriberError {
    /// A human-readable description of why delivery failed.
    pub detail: String,
}

impl SubscriberError {
    /// Creates a new subscriber error with the given detail.
    pub fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}

/// A downstream event sink.
///
/// Implementations MUST be safe to call concurrently: the queue fans out a
/// single event to every healthy subscriber in parallel, and may re-invoke
/// `track_event` for the same event on retry, so implementations SHOULD be
/// idempotent on `(event, subscriber)`.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// A stable, low-cardinality name used as the sole subscriber-labeling
    /// dimension in metrics. Must not vary per event or per instance churn.
    fn name(&self) -> &str;

    /// Delivers exactly one event. Subscribers are responsible for honoring
    /// any cancellation or deadline carried by the ambient task; the core
    /// imposes no timeout of its own.
    async fn track_event(
        &self,
        name: &str,
        attributes: &Attributes,
        context: &AutotelContext,
    ) -> Result<(), SubscriberError>;
}

/// Derives a stable, lowercase subscriber identity from a type name, per the
/// "computed from the subscriber's type name with a trailing `Subscriber`
/// stripped" rule — used by subscriber implementations that do not supply an
/// explicit name.
pub fn identity_from_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let short = full.rsplit("::").next().unwrap_or(full);
    short.strip_suffix("Subscriber").unwrap_or(short).to_lowercase()
}

/// A subscriber that accepts every event and always succeeds. Useful as a
/// test fixture or as a placeholder while wiring up a pipeline.
pub struct NoopSubscriber {
    name: String,
}

impl NoopSubscriber {
    /// Creates a new no-op subscriber with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Subscriber for NoopSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn track_event(
        &self,
        name: &str,
        _attributes: &Attributes,
        _context: &AutotelContext,
    ) -> Result<(), SubscriberError> {
        tracing::trace!(subscriber = %self.name, event = %name, "noop subscriber dropping event");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct ExampleSubscriber;
    struct PostHog;

    #[test]
    fn identity_strips_trailing_subscriber_suffix_and_lowercases() {
        assert_eq!(identity_from_type_name::<ExampleSubscriber>(), "example");
    }

    #[test]
    fn identity_without_the_suffix_is_unchanged_but_lowercased() {
        assert_eq!(identity_from_type_name::<PostHog>(), "posthog");
    }

    #[tokio::test]
    async fn noop_subscriber_always_succeeds() {
        let subscriber = NoopSubscriber::new("noop");
        let attrs = Attributes::new();
        let ctx = AutotelContext::new("corr-1");

        assert!(subscriber.track_event("signup", &attrs, &ctx).await.is_ok());
        assert_eq!(subscriber.name(), "noop");
    }
}
