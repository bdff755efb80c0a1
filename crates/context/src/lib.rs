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

//! Ambient, task-local correlation ids.
//!
//! A correlation id ties together the events, logs, and spans produced by a
//! single logical task (a request, a traced operation, a background job)
//! without threading an identifier through every call by hand. The binding
//! lives for the lifetime of the task and is never a process-global value, so
//! concurrent tasks never observe each other's id.

use std::future::Future;

use rand::Rng;

tokio::task_local! {
    static CORRELATION_ID: String;
}

const ID_LEN: usize = 16;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Entry point for binding and reading the ambient correlation id.
///
/// This is a namespace of associated functions, not a value: binding is
/// task-local state managed by `tokio::task_local!`, never a process-wide
/// singleton.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationContext;

impl CorrelationContext {
    /// Returns the correlation id bound to the current task, if any, without
    /// minting one.
    pub fn current() -> Option<String> {
        CORRELATION_ID.try_with(Clone::clone).ok()
    }

    /// Returns the current task's correlation id, minting and binding one if
    /// none exists yet.
    ///
    /// If the current task was never entered through [`CorrelationContext::scope`]
    /// (degraded mode: the runtime has no notion of task binding for this
    /// call site), a fresh id is generated and returned but cannot be bound
    /// retroactively, so a later call on the same task may return a
    /// different id. Within a task that *was* entered through `scope`,
    /// repeated calls always return the same id.
    pub fn get_or_create() -> String {
        CORRELATION_ID.try_with(Clone::clone).unwrap_or_else(|_| generate_id())
    }

    /// Runs `fut` with `id` (or a freshly minted id if `id` is `None`) bound
    /// as the ambient correlation id for its entire lifetime.
    ///
    /// Hosts call this once at the boundary of a logical task (request
    /// entry, spawned job) so that every event enqueued, every log emitted,
    /// and every span created while `fut` runs can be joined on the same id.
    pub async fn scope<F>(id: Option<String>, fut: F) -> F::Output
    where
        F: Future,
    {
        CORRELATION_ID.scope(id.unwrap_or_else(generate_id), fut).await
    }
}

fn generate_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn outside_a_scope_get_or_create_is_degraded() {
        assert_eq!(CorrelationContext::current(), None);
        // No panic, no binding: just a fresh id every call.
        let a = CorrelationContext::get_or_create();
        let b = CorrelationContext::get_or_create();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn repeated_calls_within_a_scope_agree() {
        CorrelationContext::scope(None, async {
            let a = CorrelationContext::get_or_create();
            let b = CorrelationContext::get_or_create();
            assert_eq!(a, b);
            assert_eq!(CorrelationContext::current(), Some(a));
        })
        .await;
    }

    #[tokio::test]
    async fn an_explicit_id_is_honored() {
        CorrelationContext::scope(Some("explicit-id".to_string()), async {
            assert_eq!(CorrelationContext::current(), Some("explicit-id".to_string()));
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_tasks_get_independent_ids() {
        let a = tokio::spawn(CorrelationContext::scope(None, async {
            CorrelationContext::get_or_create()
        }));
        let b = tokio::spawn(CorrelationContext::scope(None, async {
            CorrelationContext::get_or_create()
        }));

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn generated_ids_meet_the_entropy_floor() {
        // 64 bits of entropy requires at least 64 / log2(alphabet_len) symbols.
        let bits_per_symbol = (ALPHABET.len() as f64).log2();
        assert!(ID_LEN as f64 * bits_per_symbol >= 64.0);
    }
}
