//! Loop-wide pending-flags bitmask.
//!
//! Every event source escalates into one bit of this mask. The loop thread
//! swaps the whole mask to zero once per wait cycle and services each bit
//! that was set.

use super::signal::WakeSignal;

use std::sync::atomic::{AtomicU32, Ordering};

/// At least one wakeup-channel handle has a pending delivery.
pub(crate) const PENDING_ASYNC: u32 = 1 << 0;

/// The poll helper thread has fd-level results waiting in the FD set.
pub(crate) const PENDING_POLL: u32 = 1 << 1;

/// Cross-thread completions are queued.
pub(crate) const PENDING_COMPLETION: u32 = 1 << 2;

pub(crate) struct PendingFlags(AtomicU32);

impl PendingFlags {
    pub(crate) fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Sets `bit` and raises the wake signal if this call set it first.
    ///
    /// Writes made before the escalation are visible to the loop thread once
    /// it observes the bit through [`take`](Self::take). Returns `true` when
    /// this caller raised the signal.
    pub(crate) fn escalate(&self, bit: u32, signal: &WakeSignal) -> bool {
        let previous = self.0.fetch_or(bit, Ordering::AcqRel);

        if previous & bit == 0 {
            signal.set();
            true
        } else {
            false
        }
    }

    /// Atomically swaps the mask to zero, returning the bits that were set.
    pub(crate) fn take(&self) -> u32 {
        self.0.swap(0, Ordering::Acquire)
    }

    pub(crate) fn is_set(&self, bit: u32) -> bool {
        self.0.load(Ordering::Acquire) & bit != 0
    }
}
