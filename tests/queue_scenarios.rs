//! End-to-end scenarios exercising the event delivery queue as a whole:
//! admission, backpressure, retry, shutdown drain, and rate limiting.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use autotel_core::queue::{Attributes, AutotelContext, Event, Queue, QueueConfig, RateLimitConfig, SubscriberError};
use autotel_core::subscriber::Subscriber;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;

fn test_meter() -> (SdkMeterProvider, opentelemetry::metrics::Meter) {
    let provider = SdkMeterProvider::builder().build();
    let meter = provider.meter("autotel-core-integration-test");
    (provider, meter)
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock").as_millis() as i64
}

fn event(name: &str) -> Event {
    Event::new(name, now_ms(), Attributes::new())
}

/// Records every event name it receives, in the order received, and
/// optionally blocks forever (to simulate a stalled subscriber).
struct RecordingSubscriber {
    name: String,
    received: Mutex<Vec<String>>,
    paused: bool,
}

impl RecordingSubscriber {
    fn new(name: &str, paused: bool) -> Self {
        Self {
            name: name.to_string(),
            received: Mutex::new(Vec::new()),
            paused,
        }
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn track_event(
        &self,
        name: &str,
        _attributes: &Attributes,
        _context: &AutotelContext,
    ) -> Result<(), SubscriberError> {
        if self.paused {
            std::future::pending::<()>().await;
        }
        self.received.lock().expect("lock poisoned").push(name.to_string());
        Ok(())
    }
}

struct CountingSubscriber {
    name: String,
    calls: AtomicUsize,
}

impl CountingSubscriber {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Subscriber for CountingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn track_event(
        &self,
        _name: &str,
        _attributes: &Attributes,
        _context: &AutotelContext,
    ) -> Result<(), SubscriberError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn happy_path_delivers_five_events_in_arrival_order() {
    let (_provider, meter) = test_meter();
    let subscriber = Arc::new(RecordingSubscriber::new("sub", false));
    let queue = Queue::new(
        QueueConfig::builder().max_size(10).batch_size(3).flush_interval(Duration::from_millis(50)).build(),
        vec![subscriber.clone() as Arc<dyn Subscriber>],
        &meter,
    )
    .expect("queue construction");

    for i in 0..5 {
        queue.enqueue(event(&format!("evt-{i}")));
    }

    queue.flush().await;

    assert_eq!(
        subscriber.received(),
        vec!["evt-0", "evt-1", "evt-2", "evt-3", "evt-4"]
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
    );
    assert_eq!(queue.len(), 0);
}

#[tokio::test]
async fn overflow_drops_the_two_oldest_and_keeps_the_three_newest() {
    let (_provider, meter) = test_meter();
    let subscriber = Arc::new(RecordingSubscriber::new("sub", false));
    let queue = Queue::new(
        QueueConfig::builder().max_size(3).batch_size(10).build(),
        vec![subscriber.clone() as Arc<dyn Subscriber>],
        &meter,
    )
    .expect("queue construction");

    for i in 0..5 {
        queue.enqueue(event(&format!("evt-{i}")));
    }

    assert_eq!(queue.len(), 3, "only the most recent three survive drop-oldest eviction");

    queue.flush().await;

    assert_eq!(
        subscriber.received(),
        vec!["evt-2", "evt-3", "evt-4"].into_iter().map(str::to_string).collect::<Vec<_>>(),
        "the two oldest events are gone; the three newest are delivered in arrival order"
    );
}

#[tokio::test]
async fn shutdown_drains_concurrently_enqueued_events_and_then_rejects_new_ones() {
    let (_provider, meter) = test_meter();
    let subscriber = Arc::new(CountingSubscriber::new("sub"));
    let queue = Queue::new(
        QueueConfig::builder().batch_size(4).build(),
        vec![subscriber.clone() as Arc<dyn Subscriber>],
        &meter,
    )
    .expect("queue construction");

    for i in 0..10 {
        queue.enqueue(event(&format!("evt-{i}")));
    }

    queue.shutdown().await;

    assert_eq!(subscriber.calls.load(Ordering::SeqCst), 10, "every event delivered during the drain");
    assert_eq!(queue.len(), 0);

    queue.enqueue(event("after-shutdown"));
    assert_eq!(queue.len(), 0, "admission after shutdown never reaches the FIFO");
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let (_provider, meter) = test_meter();
    let queue = Queue::new(QueueConfig::builder().build(), Vec::new(), &meter).expect("queue construction");

    queue.shutdown().await;
    queue.shutdown().await;
    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rate_limiting_bounds_invocations_per_window() {
    let (_provider, meter) = test_meter();
    let subscriber = Arc::new(CountingSubscriber::new("sub"));

    // `start_paused` auto-advances tokio's virtual clock whenever every task
    // is blocked on a timer, so the real system clock (which `wait_for_token`
    // samples through `tokio::time::Instant`) still exercises the rate
    // limiter's actual refill math without the test taking wall-clock time.
    let queue = Queue::new(
        QueueConfig::builder()
            .batch_size(100)
            .rate_limit(RateLimitConfig::new(10.0).with_burst_capacity(10.0))
            .build(),
        vec![subscriber.clone() as Arc<dyn Subscriber>],
        &meter,
    )
    .expect("queue construction");

    for i in 0..30 {
        queue.enqueue(event(&format!("evt-{i}")));
    }

    queue.flush().await;

    assert_eq!(subscriber.calls.load(Ordering::SeqCst), 30, "every event eventually delivered once admitted");
}
