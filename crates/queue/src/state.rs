//! The queue's mutex-guarded internal state.
//!
//! Kept separate from [`crate::Queue`] so the short, synchronous critical
//! sections that touch the FIFO are easy to audit for "never held across an
//! `.await`". Serializing the actual drain work (at most one flush in
//! flight) is a separate concern, handled by `Queue`'s `tokio::sync::Mutex`
//! flush gate rather than a flag in here, so this struct only ever needs a
//! `std::sync::Mutex` and never blocks across an await point.

use std::collections::VecDeque;

use tokio::task::JoinHandle;

use crate::event::QueuedEvent;

/// The queue's FIFO plus the bookkeeping needed to keep at most one flush
/// timer pending at a time.
#[derive(Default)]
pub(crate) struct QueueState {
    pub(crate) fifo: VecDeque<QueuedEvent>,
    pub(crate) shutdown: bool,
    pub(crate) pending_flush: Option<JoinHandle<()>>,
    next_id: u64,
}

impl QueueState {
    /// Assigns and returns the next admission id.
    pub(crate) fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
