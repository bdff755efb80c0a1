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

//! The bounded FIFO, batcher, retry controller, fan-out scheduler, and
//! shutdown coordinator that move events from `enqueue` to subscriber
//! delivery.
//!
//! `Queue` is a cheap-to-clone handle (`Arc` around its actual state); hosts
//! construct one per process and share clones across the call sites that
//! need to `enqueue` events.

mod config;
mod error;
mod event;
mod state;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use autotel_context::CorrelationContext;
use autotel_metrics::{DropReason, MetricsSurface, QueueSnapshot};
use autotel_ratelimit::{Clock, RateLimiter, SystemClock};
use autotel_subscriber::{AutotelContext, Subscriber};
use opentelemetry::{
    metrics::{Meter, MetricsError},
    trace::TraceContextExt,
    Context as OtelContext,
};

pub use error::AdmissionError;
pub use event::{Event, QueuedEvent};

pub use autotel_subscriber::{Attributes, AttributeValue, SubscriberError};

pub use config::{QueueConfig, QueueConfigBuilder, RateLimitConfig};
use state::QueueState;

struct QueueInner {
    config: QueueConfig,
    subscribers: Vec<Arc<dyn Subscriber>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    metrics: MetricsSurface,
    snapshot: Arc<QueueSnapshot>,
    state: Mutex<QueueState>,
    flush_gate: tokio::sync::Mutex<()>,
}

/// The event delivery queue: bounded admission, debounced batching,
/// per-`(event, subscriber)` retry with backoff, and cooperative shutdown.
///
/// Cloning a `Queue` clones a handle to the same shared state — it does not
/// create an independent queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Builds a queue from `config`, fanning out to `subscribers`, with
    /// instruments registered against `meter`. Uses the real system clock
    /// for the rate limiter, if `config.rate_limit` is set.
    pub fn new(config: QueueConfig, subscribers: Vec<Arc<dyn Subscriber>>, meter: &Meter) -> Result<Self, MetricsError> {
        Self::with_clock(config, subscribers, meter, Arc::new(SystemClock))
    }

    /// Like [`Queue::new`], but with an injectable [`Clock`] for the rate
    /// limiter — used by tests that need deterministic refill timing.
    pub fn with_clock(
        config: QueueConfig,
        subscribers: Vec<Arc<dyn Subscriber>>,
        meter: &Meter,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MetricsError> {
        let rate_limiter = config.rate_limit.as_ref().map(|rate_limit| {
            Arc::new(RateLimiter::with_clock(
                rate_limit.max_events_per_second,
                rate_limit.resolved_burst_capacity(),
                Arc::clone(&clock),
            ))
        });

        let snapshot = Arc::new(QueueSnapshot::new());
        let metrics = MetricsSurface::new(meter, Arc::clone(&snapshot), current_epoch_ms)?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                subscribers,
                rate_limiter,
                metrics,
                snapshot,
                state: Mutex::new(QueueState::default()),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Admits `event`. Never blocks beyond the brief critical section
    /// needed to append to the FIFO, never performs network I/O, and never
    /// fails loudly: rejections are recorded as metrics and a log line.
    pub fn enqueue(&self, event: Event) {
        if let Err(error) = validate(&event) {
            self.inner.metrics.record_dropped(DropReason::PayloadInvalid, None);
            tracing::warn!(%error, "dropping invalid event");
            return;
        }

        let mut state = self.inner.state.lock().expect("queue state lock poisoned");

        // Step 1: shutdown short-circuits before eviction is ever considered.
        if state.shutdown {
            drop(state);
            self.inner.metrics.record_dropped(DropReason::Shutdown, None);
            tracing::warn!(event = %event.name, "dropping event enqueued after shutdown");
            return;
        }

        // Step 2: at capacity, evict the oldest entry to make room. A
        // zero-capacity queue has no "oldest" entry to evict, so the
        // incoming event itself is the one dropped.
        if self.inner.config.max_size == 0 {
            drop(state);
            self.inner.metrics.record_dropped(DropReason::RateLimit, None);
            tracing::warn!(event = %event.name, "queue has zero capacity, dropping event");
            return;
        }
        if state.fifo.len() >= self.inner.config.max_size {
            let evicted = state.fifo.pop_front();
            self.inner.metrics.record_dropped(DropReason::RateLimit, None);
            tracing::warn!(
                evicted_event = %evicted.map(|e| e.event.name).unwrap_or_default(),
                "queue at capacity, evicting oldest event"
            );
        }

        // Step 3: annotate with correlation id and active trace id.
        let context = AutotelContext::new(CorrelationContext::get_or_create());
        let context = match active_trace_id() {
            Some(trace_id) => context.with_trace_id(trace_id),
            None => context,
        };

        // Step 4: append to the FIFO tail.
        let id = state.next_id();
        state.fifo.push_back(QueuedEvent::new(id, event, context));
        self.inner.snapshot.set_size(state.fifo.len());
        self.inner
            .snapshot
            .set_oldest_enqueued_at_ms(state.fifo.front().map(|e| e.event.timestamp));

        // Step 5: schedule a flush if none is pending.
        self.schedule_flush(&mut state);
    }

    /// Drains the FIFO without setting the shutdown flag. Safe to call
    /// concurrently with `enqueue`; returns once the FIFO was observed
    /// empty at some point in time. Idempotent on an already-empty queue.
    pub async fn flush(&self) {
        self.drain().await;
    }

    /// Idempotent shutdown: rejects further admissions, cancels any
    /// scheduled-but-not-started flush, awaits the current flush (if any),
    /// then drains the FIFO in-line honoring retry policy, and finally
    /// un-registers every observable metric callback.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().expect("queue state lock poisoned");
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            if let Some(handle) = state.pending_flush.take() {
                handle.abort();
            }
        }

        self.drain().await;
        self.inner.metrics.shutdown();
    }

    /// The number of events currently queued.
    pub fn len(&self) -> usize {
        self.inner.snapshot.current_size()
    }

    /// Whether the FIFO is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn schedule_flush(&self, state: &mut QueueState) {
        if state.fifo.is_empty() || state.pending_flush.is_some() {
            return;
        }

        let queue = self.clone();
        let interval = self.inner.config.flush_interval;
        state.pending_flush = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let mut state = queue.inner.state.lock().expect("queue state lock poisoned");
                state.pending_flush = None;
            }
            queue.drain().await;

            let mut state = queue.inner.state.lock().expect("queue state lock poisoned");
            if !state.shutdown {
                queue.schedule_flush(&mut state);
            }
        }));
    }

    /// Runs batches until the FIFO is empty, serialized against any other
    /// concurrent drain (explicit `flush`, the scheduled timer, or
    /// `shutdown`'s own drain) through `flush_gate`.
    async fn drain(&self) {
        let _guard = self.inner.flush_gate.lock().await;
        loop {
            let batch = self.pull_batch();
            if batch.is_empty() {
                break;
            }
            self.process_batch(batch).await;
        }
    }

    fn pull_batch(&self) -> Vec<QueuedEvent> {
        let mut state = self.inner.state.lock().expect("queue state lock poisoned");
        let mut batch = Vec::with_capacity(self.inner.config.batch_size.min(state.fifo.len()));
        while batch.len() < self.inner.config.batch_size {
            match state.fifo.pop_front() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        self.inner.snapshot.set_size(state.fifo.len());
        self.inner
            .snapshot
            .set_oldest_enqueued_at_ms(state.fifo.front().map(|e| e.event.timestamp));
        batch
    }

    /// Processes one batch as a whole: every event gets its first delivery
    /// attempt (in FIFO order, each event's own fan-out concurrent across
    /// subscribers) before any event gets a retry. Failed `(event,
    /// subscriber)` pairs across the *entire* batch are collected after the
    /// pass completes and re-driven together, so one event's backoff never
    /// stalls another event's first attempt.
    async fn process_batch(&self, batch: Vec<QueuedEvent>) {
        let mut pending: Vec<(QueuedEvent, HashMap<String, Arc<dyn Subscriber>>)> = batch
            .into_iter()
            .map(|event| {
                let targets = self
                    .inner
                    .subscribers
                    .iter()
                    .map(|s| (s.name().to_string(), Arc::clone(s)))
                    .collect();
                (event, targets)
            })
            .collect();

        let mut retries_left = self.inner.config.max_retries;

        loop {
            if pending.is_empty() {
                return;
            }

            let mut next_round = Vec::new();
            for (event, targets) in pending {
                if let Some(limiter) = &self.inner.rate_limiter {
                    limiter.wait_for_token(1.0).await;
                }

                let outcomes = fan_out(&event, &targets).await;

                let mut failed: HashMap<String, Arc<dyn Subscriber>> = HashMap::new();
                for (name, result) in outcomes {
                    match result {
                        Ok(()) => {
                            self.inner.metrics.record_delivered(&name);
                            let latency_ms = (current_epoch_ms() - event.event.timestamp).max(0) as f64;
                            self.inner.metrics.record_latency_ms(&name, latency_ms);
                            self.inner.snapshot.set_health(&name, true);
                        }
                        Err(error) => {
                            self.inner.snapshot.set_health(&name, false);
                            tracing::warn!(subscriber = %name, %error, event = %event.event.name, "subscriber delivery attempt failed");
                            let subscriber = Arc::clone(targets.get(&name).expect("target present in this round"));
                            let _ = failed.insert(name, subscriber);
                        }
                    }
                }

                if failed.is_empty() {
                    continue;
                }

                if retries_left == 0 {
                    for name in failed.keys() {
                        self.inner.metrics.record_failed(name);
                        self.inner.snapshot.set_health(name, false);
                        tracing::error!(subscriber = %name, event = %event.event.name, "subscriber delivery failed after exhausting retries");
                    }
                } else {
                    next_round.push((event, failed));
                }
            }

            if next_round.is_empty() {
                return;
            }

            let attempt = self.inner.config.max_retries - retries_left;
            let backoff = Duration::from_secs_f64(2f64.powi(attempt as i32));
            retries_left -= 1;
            pending = next_round;
            tokio::time::sleep(backoff).await;
        }
    }
}

async fn fan_out(
    event: &QueuedEvent,
    targets: &HashMap<String, Arc<dyn Subscriber>>,
) -> Vec<(String, Result<(), SubscriberError>)> {
    let calls = targets.iter().map(|(name, subscriber)| {
        let name = name.clone();
        let subscriber = Arc::clone(subscriber);
        let event_name = event.event.name.clone();
        let attributes = event.event.attributes.clone();
        let context = event.context.clone();
        async move {
            let result = subscriber.track_event(&event_name, &attributes, &context).await;
            (name, result)
        }
    });
    futures::future::join_all(calls).await
}

fn validate(event: &Event) -> Result<(), AdmissionError> {
    if event.name.is_empty() {
        return Err(AdmissionError::PayloadInvalid("event name must not be empty".to_string()));
    }
    Ok(())
}

fn active_trace_id() -> Option<String> {
    let context = OtelContext::current();
    let span_context = context.span().span_context().clone();
    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

fn current_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
