//! Per-descriptor readiness watchers.

use super::core::Loop;

use bitflags::bitflags;
use std::fmt;
use std::os::fd::RawFd;

bitflags! {
    /// Readiness events, expressed with the `poll(2)` event bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Events: i16 {
        const READABLE = libc::POLLIN;
        const PRIORITY = libc::POLLPRI;
        const WRITABLE = libc::POLLOUT;
        const ERROR = libc::POLLERR;
        const HANGUP = libc::POLLHUP;
        const INVALID = libc::POLLNVAL;
    }
}

/// Callback invoked on the loop thread with the events that fired.
pub(crate) type IoCallback = Box<dyn FnMut(&mut Loop, RawFd, Events)>;

/// Registered interest in one descriptor.
pub(crate) struct Watcher {
    /// Events requested by the owner.
    pub(crate) pevents: Events,

    /// Events currently installed in the FD set.
    pub(crate) events: Events,

    /// `None` while the callback is running.
    pub(crate) callback: Option<IoCallback>,

    /// Whether the descriptor sits in the newly-registered watcher queue.
    pub(crate) queued: bool,
}

impl Watcher {
    pub(crate) fn new(callback: IoCallback) -> Self {
        Self {
            pevents: Events::empty(),
            events: Events::empty(),
            callback: Some(callback),
            queued: false,
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("pevents", &self.pevents)
            .field("events", &self.events)
            .field("queued", &self.queued)
            .finish_non_exhaustive()
    }
}
