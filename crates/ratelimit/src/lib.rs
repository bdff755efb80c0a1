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

//! A token-bucket rate limiter used to smooth outbound traffic to
//! subscribers.
//!
//! Refill is computed lazily on each operation from the elapsed time since
//! the last refill, so the limiter needs no background task of its own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// A monotonic time source, injectable so tests don't depend on wall-clock
/// sleeps.
///
/// Returns a [`tokio::time::Instant`] rather than [`std::time::Instant`] so
/// that [`SystemClock`] tracks the same (possibly paused, test-controlled)
/// clock that `tokio::time::sleep` waits on; otherwise a paused-time test
/// could advance the timer wheel without ever satisfying a refill computed
/// against real wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current instant according to this clock.
    fn now(&self) -> Instant;
}

/// The real, monotonic clock, tracking tokio's (possibly test-paused) time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances when told to, for deterministic tests of
/// refill and backoff timing.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a manual clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().expect("manual clock lock poisoned");
        *now += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("manual clock lock poisoned")
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket admission control, shared across the outbound delivery
/// path.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    clock: Arc<dyn Clock>,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a rate limiter refilling at `rate` tokens/second up to
    /// `capacity` tokens, using the real system clock.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self::with_clock(rate, capacity, Arc::new(SystemClock))
    }

    /// Creates a rate limiter backed by an explicit [`Clock`], for tests.
    pub fn with_clock(rate: f64, capacity: f64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            rate,
            capacity,
            clock,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Atomically admits `n` tokens if available, without waiting.
    pub fn try_consume(&self, n: f64) -> bool {
        let mut bucket = self.bucket.lock().expect("rate limiter bucket lock poisoned");
        self.refill(&mut bucket);
        if bucket.tokens >= n {
            bucket.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Cooperatively waits until `n` tokens are available, then consumes
    /// them. Never busy-spins: each iteration computes the exact shortfall
    /// and sleeps for that long before re-checking.
    pub async fn wait_for_token(&self, n: f64) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().expect("rate limiter bucket lock poisoned");
                self.refill(&mut bucket);
                if bucket.tokens >= n {
                    bucket.tokens -= n;
                    None
                } else {
                    let shortfall = n - bucket.tokens;
                    Some(Duration::from_secs_f64((shortfall / self.rate).max(0.0)))
                }
            };

            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration.max(Duration::from_millis(1))).await,
            }
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}
