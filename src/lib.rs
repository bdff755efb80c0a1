#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results,
    variant_size_differences
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Autotel's event-delivery pipeline: the subsystem that accepts
//! business/product events emitted from traced code, enriches them with
//! trace correlation, and asynchronously delivers them to one or more
//! external event subscribers (analytics/product platforms).
//!
//! The pipeline is composed of five cooperating crates, re-exported here as
//! modules:
//!
//! - [`context`] — ambient, task-local correlation ids (C1).
//! - [`ratelimit`] — token-bucket admission control shared across the
//!   outbound path (C2).
//! - [`subscriber`] — the uniform capability the queue invokes to hand one
//!   event to one downstream sink (C3).
//! - [`metrics`] — the queue's self-observing instruments (C4).
//! - [`queue`] — the bounded FIFO, batcher, retry controller, fan-out
//!   scheduler, and shutdown coordinator (C5).
//!
//! A host typically only needs [`queue::Queue`], [`subscriber::Subscriber`],
//! and [`queue::QueueConfig`]; the other crates are exposed for callers that
//! want to reuse the correlation id or rate limiter independently.

pub use autotel_context as context;
pub use autotel_metrics as metrics;
pub use autotel_queue as queue;
pub use autotel_ratelimit as ratelimit;
pub use autotel_subscriber as subscriber;
