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

//! The metrics the event delivery queue publishes through a host-supplied
//! OpenTelemetry `Meter`: counters and a histogram recorded on the hot path,
//! plus observable gauges that sample the queue's own state at collection
//! time.
//!
//! Label cardinality is a hard constraint: `subscriber` is only ever one of
//! the finitely many configured subscriber identities, and `reason` is only
//! ever one of the four [`DropReason`] tags. No other label ever reaches
//! these instruments.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use opentelemetry::{
    metrics::{CallbackRegistration, Counter, Histogram, Meter, MetricsError},
    KeyValue,
};

/// The closed set of reasons an event can be dropped, used as the sole
/// `reason` label on `queue.dropped`. No other values are ever recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The queue was at capacity and the oldest entry was evicted.
    RateLimit,
    /// Reserved for a surrounding circuit-breaker component; the core does
    /// not produce this reason itself.
    CircuitOpen,
    /// The event failed validation before admission (e.g. empty name).
    PayloadInvalid,
    /// The queue had already been shut down.
    Shutdown,
}

impl DropReason {
    /// The label value recorded on `queue.dropped{reason=...}`.
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::RateLimit => "rate_limit",
            DropReason::CircuitOpen => "circuit_open",
            DropReason::PayloadInvalid => "payload_invalid",
            DropReason::Shutdown => "shutdown",
        }
    }
}

/// A lock-cheap snapshot of queue state, read by observable-gauge callbacks
/// without ever taking the queue's hot-path lock.
///
/// `size` and `oldest_enqueued_at_ms` are plain atomics so the hot enqueue
/// path can update them without blocking a concurrent metrics collection.
/// `health` is a small map behind its own mutex, independent of the queue's
/// FIFO lock.
#[derive(Debug, Default)]
pub struct QueueSnapshot {
    size: AtomicUsize,
    oldest_enqueued_at_ms: AtomicI64,
    health: Mutex<HashMap<String, bool>>,
}

impl QueueSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current queue depth.
    pub fn set_size(&self, size: usize) {
        self.size.store(size, Ordering::Relaxed);
    }

    /// Records the enqueue timestamp (epoch millis) of the oldest queued
    /// event, or clears it when the queue is empty.
    pub fn set_oldest_enqueued_at_ms(&self, timestamp_ms: Option<i64>) {
        self.oldest_enqueued_at_ms.store(timestamp_ms.unwrap_or(0), Ordering::Relaxed);
    }

    /// Marks a subscriber healthy or unhealthy based on its most recent
    /// delivery outcome.
    pub fn set_health(&self, subscriber: &str, healthy: bool) {
        let mut health = self.health.lock().expect("queue snapshot health lock poisoned");
        let _ = health.insert(subscriber.to_string(), healthy);
    }

    /// The current queue depth, as last recorded by `set_size`.
    ///
    /// Exposed publicly (unlike `oldest_age_ms`/`health_values`) so a host
    /// embedding the queue can check drain progress synchronously, without
    /// scraping metrics — see `Queue::len`/`Queue::is_empty`.
    pub fn current_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn size_value(&self) -> u64 {
        self.size.load(Ordering::Relaxed) as u64
    }

    fn oldest_age_ms(&self, now_ms: i64) -> u64 {
        let oldest = self.oldest_enqueued_at_ms.load(Ordering::Relaxed);
        if oldest == 0 {
            0
        } else {
            (now_ms - oldest).max(0) as u64
        }
    }

    fn health_values(&self) -> Vec<(String, bool)> {
        self.health
            .lock()
            .expect("queue snapshot health lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// The full set of metric instruments described in the module-level docs,
/// bound to a host-supplied `Meter`.
pub struct MetricsSurface {
    delivered: Counter<u64>,
    failed: Counter<u64>,
    dropped: Counter<u64>,
    latency_ms: Histogram<f64>,
    callback_registration: Mutex<Option<Box<dyn CallbackRegistration>>>,
}

impl MetricsSurface {
    /// Registers every instrument against `meter`, sampling `snapshot` for
    /// the observable gauges. `now_ms` supplies the current epoch
    /// millisecond timestamp for `queue.oldest_age_ms` and must be cheap and
    /// allocation-free, since it runs inside the collection callback.
    pub fn new(
        meter: &Meter,
        snapshot: Arc<QueueSnapshot>,
        now_ms: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Self, MetricsError> {
        let delivered = meter
            .u64_counter("queue.delivered")
            .with_description("Events successfully delivered to a subscriber.")
            .with_unit("1")
            .build();
        let failed = meter
            .u64_counter("queue.failed")
            .with_description("Events that exhausted all retry attempts for a subscriber.")
            .with_unit("1")
            .build();
        let dropped = meter
            .u64_counter("queue.dropped")
            .with_description("Events dropped before or during delivery, by reason.")
            .with_unit("1")
            .build();
        let latency_ms = meter
            .f64_histogram("queue.latency_ms")
            .with_description("Wall time from enqueue to successful delivery.")
            .with_unit("ms")
            .build();

        let size_gauge = meter
            .u64_observable_gauge("queue.size")
            .with_description("Number of events currently queued.")
            .with_unit("1")
            .build();
        let oldest_age_gauge = meter
            .u64_observable_gauge("queue.oldest_age_ms")
            .with_description("Age of the oldest queued event.")
            .with_unit("ms")
            .build();
        let health_gauge = meter
            .u64_observable_gauge("subscriber.health")
            .with_description("1 if the subscriber's most recent delivery succeeded, 0 otherwise.")
            .with_unit("1")
            .build();

        let callback_snapshot = snapshot;
        let callback_registration = meter.register_callback(
            &[size_gauge.as_any(), oldest_age_gauge.as_any(), health_gauge.as_any()],
            move |observer| {
                observer.observe_u64(&size_gauge, callback_snapshot.size_value(), &[]);
                observer.observe_u64(&oldest_age_gauge, callback_snapshot.oldest_age_ms(now_ms()), &[]);
                for (subscriber, healthy) in callback_snapshot.health_values() {
                    observer.observe_u64(
                        &health_gauge,
                        u64::from(healthy),
                        &[KeyValue::new("subscriber", subscriber)],
                    );
                }
            },
        )?;

        Ok(Self {
            delivered,
            failed,
            dropped,
            latency_ms,
            callback_registration: Mutex::new(Some(callback_registration)),
        })
    }

    /// Records one successful delivery to `subscriber`.
    pub fn record_delivered(&self, subscriber: &str) {
        self.delivered.add(1, &[KeyValue::new("subscriber", subscriber.to_string())]);
    }

    /// Records one terminal (retries-exhausted) failure for `subscriber`.
    pub fn record_failed(&self, subscriber: &str) {
        self.failed.add(1, &[KeyValue::new("subscriber", subscriber.to_string())]);
    }

    /// Records one dropped event. `subscriber` is only meaningful for
    /// per-subscriber drop reasons; admission-time drops (queue overflow,
    /// shutdown, invalid payload) have none.
    pub fn record_dropped(&self, reason: DropReason, subscriber: Option<&str>) {
        let mut attributes = vec![KeyValue::new("reason", reason.as_str())];
        if let Some(subscriber) = subscriber {
            attributes.push(KeyValue::new("subscriber", subscriber.to_string()));
        }
        self.dropped.add(1, &attributes);
    }

    /// Records the delivery latency (enqueue to successful delivery) for
    /// `subscriber`.
    pub fn record_latency_ms(&self, subscriber: &str, latency_ms: f64) {
        self.latency_ms
            .record(latency_ms, &[KeyValue::new("subscriber", subscriber.to_string())]);
    }

    /// Un-registers every observable callback, preventing a leaked
    /// reference to the queue's snapshot from outliving the queue. Safe to
    /// call more than once.
    pub fn shutdown(&self) {
        let mut registration = self
            .callback_registration
            .lock()
            .expect("metrics surface callback registration lock poisoned");
        if let Some(registration) = registration.take() {
            if let Err(error) = registration.unregister() {
                tracing::warn!(%error, "failed to unregister metrics callbacks");
            }
        }
    }
}

impl Drop for MetricsSurface {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drop_reason_labels_are_the_closed_four_element_set() {
        let reasons = [
            DropReason::RateLimit,
            DropReason::CircuitOpen,
            DropReason::PayloadInvalid,
            DropReason::Shutdown,
        ];
        let labels: Vec<&str> = reasons.iter().map(|r| r.as_str()).collect();
        assert_eq!(labels, ["rate_limit", "circuit_open", "payload_invalid", "shutdown"]);
    }

    #[test]
    fn snapshot_reports_zero_age_when_empty() {
        let snapshot = QueueSnapshot::new();
        assert_eq!(snapshot.size_value(), 0);
        assert_eq!(snapshot.oldest_age_ms(1_000), 0);
    }

    #[test]
    fn snapshot_tracks_size_and_age_and_health() {
        let snapshot = QueueSnapshot::new();
        snapshot.set_size(3);
        snapshot.set_oldest_enqueued_at_ms(Some(1_000));
        snapshot.set_health("segment", true);

        assert_eq!(snapshot.size_value(), 3);
        assert_eq!(snapshot.oldest_age_ms(1_500), 500);
        assert_eq!(snapshot.health_values(), vec![("segment".to_string(), true)]);

        snapshot.set_oldest_enqueued_at_ms(None);
        assert_eq!(snapshot.oldest_age_ms(1_500), 0);
    }
}
