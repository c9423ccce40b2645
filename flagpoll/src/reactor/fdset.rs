//! Descriptor-interest set handed to `poll(2)`.
//!
//! The set is a dense array of `pollfd` entries. Slot 0 always holds the
//! read end of the poll helper thread's control channel so the thread has
//! something to block on even when nothing else is watched.
//!
//! Only the loop thread mutates the array. The helper thread reads it (and
//! writes `revents`) while blocked in `poll(2)`, so every change to the
//! array contents or length first goes through [`PauseGate`].

use libc::{POLLIN, pollfd};
use std::os::fd::RawFd;

/// Descriptor value marking an empty or invalidated slot.
pub(crate) const INVALID_FD: RawFd = -1;

/// Index of the reserved control-channel slot.
pub(crate) const CONTROL_SLOT: usize = 0;

const EMPTY: pollfd = pollfd {
    fd: INVALID_FD,
    events: 0,
    revents: 0,
};

/// Stops concurrent readers of the array before it changes.
pub(crate) trait PauseGate {
    /// Returns once no other thread is blocked on the array.
    fn pause_if_running(&mut self);
}

pub(crate) struct FdSet {
    /// Backing storage; `fds.len()` is the capacity, unused slots are `EMPTY`.
    fds: Vec<pollfd>,

    /// Number of live entries, the reserved slot included.
    used: usize,

    /// Set while the loop thread walks the results; structural changes
    /// are forbidden and removals become invalidations.
    iterating: bool,
}

impl FdSet {
    pub(crate) fn new(control_fd: RawFd, capacity: usize) -> Self {
        let mut fds = vec![EMPTY; capacity.max(1)];
        fds[CONTROL_SLOT] = pollfd {
            fd: control_fd,
            events: POLLIN,
            revents: 0,
        };

        Self {
            fds,
            used: 1,
            iterating: false,
        }
    }

    /// Number of live entries, the reserved slot included.
    pub(crate) fn len(&self) -> usize {
        self.used
    }

    pub(crate) fn capacity(&self) -> usize {
        self.fds.len()
    }

    /// Returns `true` if anything beyond the reserved slot is watched.
    pub(crate) fn has_watched(&self) -> bool {
        self.used > 1
    }

    #[cfg(test)]
    pub(crate) fn control_fd(&self) -> RawFd {
        self.fds[CONTROL_SLOT].fd
    }

    pub(crate) fn entry(&self, index: usize) -> pollfd {
        self.fds[index]
    }

    pub(crate) fn set_revents(&mut self, index: usize, revents: i16) {
        self.fds[index].revents = revents;
    }

    /// Live entries beyond the reserved slot.
    #[cfg(test)]
    pub(crate) fn watched(&self) -> &[pollfd] {
        &self.fds[1..self.used]
    }

    /// Raw view handed to the poll helper thread.
    pub(crate) fn as_raw_parts(&mut self) -> (*mut pollfd, usize) {
        (self.fds.as_mut_ptr(), self.used)
    }

    pub(crate) fn is_iterating(&self) -> bool {
        self.iterating
    }

    pub(crate) fn set_iterating(&mut self, iterating: bool) {
        self.iterating = iterating;
    }

    /// Adds `fd` with `events`, or updates the mask of an existing entry.
    pub(crate) fn add(&mut self, fd: RawFd, events: i16, gate: &mut impl PauseGate) {
        assert!(!self.iterating, "FD set mutated while iterating");

        if let Some(index) = self.position(fd) {
            if self.fds[index].events != events {
                gate.pause_if_running();
                self.fds[index].events = events;
            }
            return;
        }

        gate.pause_if_running();
        self.maybe_grow();

        self.fds[self.used] = pollfd {
            fd,
            events,
            revents: 0,
        };
        self.used += 1;
    }

    /// Removes `fd`, moving the last entry into its slot.
    pub(crate) fn remove(&mut self, fd: RawFd, gate: &mut impl PauseGate) {
        assert!(!self.iterating, "FD set mutated while iterating");

        let mut index = 1;
        while index < self.used {
            if self.fds[index].fd != fd {
                // Only advance on a mismatch: when purging, the entry just
                // swapped in from the end has not been inspected yet.
                index += 1;
                continue;
            }

            gate.pause_if_running();

            self.used -= 1;
            self.fds.swap(index, self.used);
            self.fds[self.used] = EMPTY;

            if fd != INVALID_FD {
                return;
            }
        }
    }

    /// Removes every invalidated entry in one pass.
    pub(crate) fn purge(&mut self, gate: &mut impl PauseGate) {
        self.remove(INVALID_FD, gate);
    }

    /// Marks the slot of `fd` invalid without moving anything.
    pub(crate) fn invalidate(&mut self, fd: RawFd, gate: &mut impl PauseGate) {
        debug_assert!(fd >= 0);

        for index in 1..self.used {
            if self.fds[index].fd == fd {
                gate.pause_if_running();
                self.fds[index] = EMPTY;
            }
        }
    }

    fn position(&self, fd: RawFd) -> Option<usize> {
        (1..self.used).find(|&index| self.fds[index].fd == fd)
    }

    /// Doubles the backing storage when every slot is in use.
    fn maybe_grow(&mut self) {
        if self.used < self.fds.len() {
            return;
        }

        let capacity = self.fds.len() * 2;
        self.fds.resize(capacity, EMPTY);

        tracing::debug!(message = "flagpoll: FD set grown", capacity);
    }
}
