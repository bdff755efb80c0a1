//! Observability-only error taxonomy for admission-time rejections.
//!
//! None of these ever propagate as a `Result` error out of [`crate::Queue::enqueue`],
//! [`crate::Queue::flush`], or [`crate::Queue::shutdown`] — per the propagation
//! policy, those operations do not fail. Each variant exists so a log line and
//! a metric can name the same rejection precisely, and each maps to exactly
//! one `autotel_metrics::DropReason` tag.

use thiserror::Error;

/// Why an event was rejected outright at admission, before it reached the
/// FIFO. Does not cover the oldest-eviction case (`DropReason::RateLimit`):
/// that drop belongs to a *different*, already-admitted event, not the one
/// being validated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdmissionError {
    /// The event failed validation before admission (e.g. an empty name).
    #[error("invalid payload: {0}")]
    PayloadInvalid(String),

    /// The queue had already been shut down when `enqueue` was called.
    #[error("queue is shut down")]
    Shutdown,
}
