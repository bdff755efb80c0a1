//! Configuration for the event delivery queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Recognized configuration options for the event delivery queue.
///
/// Defaults match a queue tuned for steady background delivery: a large
/// bound on memory, modest batches, and a few retries before giving up.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on queued events; breaching it triggers drop-oldest.
    #[validate(range(min = 0))]
    pub max_size: usize,

    /// Maximum events pulled per flush iteration.
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// Debounce window between scheduling and draining a flush.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Attempts beyond the initial send.
    pub max_retries: u32,

    /// Token-bucket admission control applied to the outbound path, if any.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 50_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(10),
            max_retries: 3,
            rate_limit: None,
        }
    }
}

impl QueueConfig {
    /// Starts building a `QueueConfig` from the defaults.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder(Self::default())
    }
}

/// A small fluent builder over [`QueueConfig`]'s defaults, for callers that
/// configure the queue programmatically rather than from YAML.
#[derive(Debug, Clone)]
pub struct QueueConfigBuilder(QueueConfig);

impl QueueConfigBuilder {
    /// Sets `max_size`.
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.0.max_size = max_size;
        self
    }

    /// Sets `batch_size`.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.0.batch_size = batch_size;
        self
    }

    /// Sets `flush_interval`.
    #[must_use]
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.0.flush_interval = flush_interval;
        self
    }

    /// Sets `max_retries`.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.0.max_retries = max_retries;
        self
    }

    /// Sets `rate_limit`.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.0.rate_limit = Some(rate_limit);
        self
    }

    /// Finishes the builder, returning the assembled config.
    pub fn build(self) -> QueueConfig {
        self.0
    }
}

/// Token-bucket configuration for the outbound rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    /// The bucket's refill rate.
    #[validate(range(min = 0.0001))]
    pub max_events_per_second: f64,

    /// The bucket's capacity. Defaults to twice the refill rate when not
    /// supplied.
    pub burst_capacity: Option<f64>,
}

impl RateLimitConfig {
    /// Creates a rate limit config at `max_events_per_second`, with burst
    /// capacity defaulted to twice that rate.
    pub fn new(max_events_per_second: f64) -> Self {
        Self {
            max_events_per_second,
            burst_capacity: None,
        }
    }

    /// Overrides the default burst capacity.
    #[must_use]
    pub fn with_burst_capacity(mut self, burst_capacity: f64) -> Self {
        self.burst_capacity = Some(burst_capacity);
        self
    }

    /// Resolves the effective burst capacity, applying the "twice the rate"
    /// default when none was supplied.
    pub fn resolved_burst_capacity(&self) -> f64 {
        self.burst_capacity.unwrap_or(self.max_events_per_second * 2.0)
    }
}
