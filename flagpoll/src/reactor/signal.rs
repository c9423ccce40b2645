//! Wake signal and one-shot timer.
//!
//! The wake signal is the single suspension point of the loop thread. It
//! behaves like an event flag: any thread may set it, the loop thread waits
//! on it (optionally bounded by a [`OneShotTimer`]) and clears it before
//! consuming the pending-flags bitmask.

use super::poller::platform::{sys_pipe, sys_poll, sys_read, sys_write};
use crate::error::fatal;

use libc::{POLLIN, c_int, pollfd};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

/// Settable, waitable event flag backed by a self-pipe.
///
/// The flag is set while the pipe holds at least one byte. A full pipe
/// means the flag is already set, so [`set`](Self::set) never blocks.
pub(crate) struct WakeSignal {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl WakeSignal {
    /// Reserves the pipe backing the signal.
    pub(crate) fn new() -> io::Result<Self> {
        let (reader, writer) = sys_pipe()?;

        Ok(Self { reader, writer })
    }

    /// Sets the flag. Callable from any thread.
    pub(crate) fn set(&self) {
        loop {
            match sys_write(self.writer.as_raw_fd(), &[1]) {
                Ok(_) => return,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => fatal("wake signal set", e),
            }
        }
    }

    /// Returns `true` if the flag is currently set, without consuming it.
    pub(crate) fn is_set(&self) -> bool {
        self.poll_reader(0).is_some_and(|n| n > 0)
    }

    /// Blocks until the flag is set or the timer expires.
    ///
    /// An unarmed timer means wait indefinitely. The flag is left set; use
    /// [`clear`](Self::clear) to consume it.
    pub(crate) fn wait(&self, timer: &OneShotTimer) {
        loop {
            let timeout_ms = timer.remaining().map_or(-1, millis_ceil);

            match self.poll_reader(timeout_ms) {
                Some(0) if !timer.expired() => continue,
                Some(_) => return,
                None => continue,
            }
        }
    }

    /// Clears the flag by draining every queued byte.
    pub(crate) fn clear(&self) {
        let mut buf = [0u8; 64];

        loop {
            match sys_read(self.reader.as_raw_fd(), &mut buf) {
                Ok(n) if n == buf.len() => continue,
                Ok(_) => return,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => fatal("wake signal clear", e),
            }
        }
    }

    /// Polls the read end once. `None` means the call was interrupted.
    fn poll_reader(&self, timeout_ms: c_int) -> Option<usize> {
        let mut fds = [pollfd {
            fd: self.reader.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        }];

        match sys_poll(&mut fds, timeout_ms) {
            Ok(n) => Some(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
            Err(e) => fatal("wake signal wait", e),
        }
    }
}

/// A one-shot deadline bounding a single wake-signal wait.
#[derive(Debug, Default)]
pub(crate) struct OneShotTimer {
    deadline: Option<Instant>,
}

impl OneShotTimer {
    /// Creates an unarmed timer.
    pub(crate) fn new() -> Self {
        Self { deadline: None }
    }

    /// Arms the timer to fire `after` from now, replacing any earlier deadline.
    ///
    /// A deadline too far out to represent leaves the timer unarmed.
    pub(crate) fn arm(&mut self, after: Duration) {
        self.deadline = Instant::now().checked_add(after);
    }

    /// Disarms the timer, whether or not it already fired.
    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Time left before the deadline, `None` when unarmed.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once an armed deadline has passed.
    pub(crate) fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Rounds up to whole milliseconds so a wait never returns before its deadline.
fn millis_ceil(duration: Duration) -> c_int {
    duration
        .as_nanos()
        .div_ceil(1_000_000)
        .min(c_int::MAX as u128) as c_int
}
