//! Interceptor watches racing the attempt of one logical send.
//!
//! Every started watch gets a [`WatchId`]. Temporary watches are dropped and
//! started afresh each cycle; persistent watches stay pending across cycles
//! unless they fired (or are explicitly released), in which case their slot
//! is re-armed with a fresh watch.

use futures::future::BoxFuture;
use requester_core::error::Rejection;
use requester_core::operator::{Interceptor, WatchId};
use std::future::Future;
use std::task::{Context, Poll};

struct WatchEntry {
    id: WatchId,
    /// Index of the interceptor in the pipeline
    slot: usize,
    persistent: bool,
    pending: BoxFuture<'static, Rejection>,
}

/// A watch that settled.
#[derive(Debug)]
pub(crate) struct Fired {
    pub(crate) id: WatchId,
    pub(crate) persistent: bool,
    pub(crate) rejection: Rejection,
}

/// Pending watches owned by the controller of one logical send.
#[derive(Default)]
pub(crate) struct WatchSet {
    entries: Vec<WatchEntry>,
    next_id: u64,
}

impl WatchSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self) -> WatchId {
        let id = WatchId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Number of pending watches.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop the watch with this id. Returns whether it was still pending.
    pub(crate) fn release(&mut self, id: WatchId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }

    /// Prepare the race set of a new cycle.
    ///
    /// Drops every temporary watch, keeps pending persistent watches as they
    /// are, and starts a fresh watch for every temporary interceptor and every
    /// persistent interceptor without a pending watch. Returns how many
    /// watches were started.
    pub(crate) fn arm(&mut self, interceptors: &[Interceptor]) -> usize {
        self.entries.retain(|entry| entry.persistent);

        let mut started = 0;
        for (slot, interceptor) in interceptors.iter().enumerate() {
            let persistent = interceptor.is_persistent();
            if persistent && self.entries.iter().any(|entry| entry.slot == slot) {
                continue;
            }
            let id = self.issue();
            self.entries.push(WatchEntry {
                id,
                slot,
                persistent,
                pending: interceptor.middleware(),
            });
            started += 1;
        }
        started
    }

    /// Tear down every watch.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Poll every watch in registration order; the first to settle is
    /// removed and returned.
    pub(crate) fn poll_fired(&mut self, cx: &mut Context<'_>) -> Poll<Fired> {
        let settled = self.entries.iter_mut().enumerate().find_map(|(index, entry)| {
            match entry.pending.as_mut().poll(cx) {
                Poll::Ready(rejection) => Some((index, rejection)),
                Poll::Pending => None,
            }
        });

        match settled {
            Some((index, rejection)) => {
                let entry = self.entries.remove(index);
                Poll::Ready(Fired {
                    id: entry.id,
                    persistent: entry.persistent,
                    rejection,
                })
            },
            None => Poll::Pending,
        }
    }
}
