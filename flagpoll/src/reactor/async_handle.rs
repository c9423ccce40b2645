//! Cross-thread wakeup channel.
//!
//! An [`AsyncHandle`] lets any thread schedule its callback on the loop
//! thread. Sends coalesce: any number of [`send`](AsyncHandle::send) calls
//! between two delivery cycles produce a single callback run.

use super::core::{Loop, Shared};
use super::flags::PENDING_ASYNC;
use crate::utils::backoff::spin_then_yield;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Callback run on the loop thread for a delivered wakeup.
pub(crate) type AsyncCallback = Box<dyn FnMut(&mut Loop, &AsyncHandle)>;

pub(crate) struct AsyncState {
    /// Set iff a delivery is queued and has not run yet. Also set for good
    /// once the handle is closed, which blocks further escalation.
    pending: AtomicBool,

    /// Number of senders inside the escalation critical section.
    busy: AtomicUsize,

    shared: Arc<Shared>,
}

/// Sending side of a wakeup registered with [`Loop::async_init`].
///
/// Cloning is cheap and every clone refers to the same registration.
#[derive(Clone)]
pub struct AsyncHandle {
    state: Arc<AsyncState>,
}

impl AsyncHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            state: Arc::new(AsyncState {
                pending: AtomicBool::new(false),
                busy: AtomicUsize::new(0),
                shared,
            }),
        }
    }

    /// Schedules the callback on the loop thread.
    ///
    /// Callable from any thread, any number of times; never blocks. Sends
    /// made while a delivery is already queued are folded into it.
    pub fn send(&self) {
        let state = &*self.state;

        // Cheap read first.
        if state.pending.load(Ordering::Relaxed) {
            return;
        }

        // SeqCst pairs the busy increment and the pending exchange with the
        // pending store and busy load in `spin_until_idle`.
        state.busy.fetch_add(1, Ordering::SeqCst);

        if !state.pending.swap(true, Ordering::SeqCst) {
            state.shared.escalate(PENDING_ASYNC);
        }

        state.busy.fetch_sub(1, Ordering::Release);
    }

    /// Returns `true` while a delivery is queued (or the handle is closed).
    pub fn is_pending(&self) -> bool {
        self.state.pending.load(Ordering::Acquire)
    }

    pub(crate) fn same(&self, other: &AsyncHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Clears the pending flag, returning whether a delivery was queued.
    pub(crate) fn take_pending(&self) -> bool {
        self.state.pending.swap(false, Ordering::AcqRel)
    }

    /// Blocks further escalation, then waits until no sender is in flight.
    ///
    /// Must only be called on the loop thread.
    pub(crate) fn spin_until_idle(&self, spin_limit: u32) {
        let state = &*self.state;

        state.pending.swap(true, Ordering::SeqCst);
        spin_then_yield(spin_limit, || state.busy.load(Ordering::SeqCst) == 0);
    }
}

impl fmt::Debug for AsyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncHandle")
            .field("pending", &self.is_pending())
            .field("busy", &self.state.busy.load(Ordering::Relaxed))
            .finish()
    }
}

/// Loop-side registration of a handle.
pub(crate) struct AsyncSlot {
    pub(crate) handle: AsyncHandle,

    /// `None` while the callback is running.
    pub(crate) callback: Option<AsyncCallback>,

    /// Closed during a dispatch pass; removed once the pass ends.
    pub(crate) closed: bool,
}
