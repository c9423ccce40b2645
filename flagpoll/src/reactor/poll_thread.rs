//! Poll helper thread.
//!
//! The loop thread's only suspension point is the wake signal, which cannot
//! wait on descriptor readiness. A dedicated thread performs the blocking
//! `poll(2)` over the [`FdSet`] instead and escalates
//! [`PENDING_POLL`](super::flags::PENDING_POLL) when something fired.
//!
//! The thread is driven through a private control channel carrying one
//! byte per request:
//!
//! ```text
//!            POLL                      readiness / PAUSE byte
//!   PAUSE ─────────────▶ POLL ─────────────────────────────────▶ PAUSE
//!     ▲                   │
//!     │                   └──── results still unconsumed ────────▶ PAUSE
//!     │
//!     └── EXIT (from any state) ─▶ thread returns
//! ```
//!
//! Only the last byte of a burst determines the requested state. Every
//! PAUSE byte is acknowledged on a second pipe once the thread is out of
//! its `poll(2)` call, which makes a pause request synchronous.

use super::core::Shared;
use super::fdset::{CONTROL_SLOT, FdSet, PauseGate};
use super::flags::PENDING_POLL;
use super::poller::platform::{sys_pipe, sys_poll, sys_poll_raw, sys_read, sys_write};
use crate::error::fatal;

use libc::{POLLIN, pollfd};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// Requests understood by the helper thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlRequest {
    Poll = 0,
    Pause = 1,
    Exit = 2,
}

impl ControlRequest {
    /// Decodes a control byte; anything unknown ends the thread.
    pub(crate) fn from_byte(byte: u8) -> Self {
        match byte {
            0 => ControlRequest::Poll,
            1 => ControlRequest::Pause,
            _ => ControlRequest::Exit,
        }
    }
}

/// The FD set view published to the helper thread before every resume.
struct PollTarget {
    fds: AtomicPtr<pollfd>,
    len: AtomicUsize,
}

/// Loop-side controller of the helper thread.
pub(crate) struct PollThread {
    shared: Arc<Shared>,
    target: Arc<PollTarget>,

    control_rx: OwnedFd,
    control_tx: OwnedFd,
    ack_rx: OwnedFd,
    ack_tx: OwnedFd,

    handle: Option<JoinHandle<()>>,

    /// The loop thread believes the helper is not inside `poll(2)`.
    paused: bool,
}

impl PollThread {
    /// Reserves the control and acknowledgement channels.
    ///
    /// The thread itself is only started by the first
    /// [`resume_or_start`](Self::resume_or_start).
    pub(crate) fn new(shared: Arc<Shared>) -> io::Result<Self> {
        let (control_rx, control_tx) = sys_pipe()?;
        let (ack_rx, ack_tx) = sys_pipe()?;

        Ok(Self {
            shared,
            target: Arc::new(PollTarget {
                fds: AtomicPtr::new(std::ptr::null_mut()),
                len: AtomicUsize::new(0),
            }),
            control_rx,
            control_tx,
            ack_rx,
            ack_tx,
            handle: None,
            paused: false,
        })
    }

    /// Read end of the control channel, reserved in FD set slot 0.
    pub(crate) fn control_fd(&self) -> RawFd {
        self.control_rx.as_raw_fd()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    /// Starts the thread, or tells a paused one to poll again.
    pub(crate) fn resume_or_start(&mut self, fds: &mut FdSet) {
        if self.paused {
            self.publish(fds);
            self.paused = false;
            self.request(ControlRequest::Poll);
            tracing::trace!(message = "flagpoll: poll thread resumed", fds = fds.len());
        } else if self.handle.is_none() {
            self.publish(fds);
            self.spawn();
        }
    }

    /// Records that the helper reported results and paused itself.
    pub(crate) fn mark_paused(&mut self) {
        self.paused = true;
    }

    /// Stops and joins the thread. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.request(ControlRequest::Exit);

        if handle.join().is_err() {
            tracing::error!(message = "flagpoll: poll thread panicked");
        }

        tracing::debug!(message = "flagpoll: poll thread joined");
    }

    fn publish(&self, fds: &mut FdSet) {
        let (ptr, len) = fds.as_raw_parts();
        self.target.len.store(len, Ordering::Relaxed);
        self.target.fds.store(ptr, Ordering::Release);
    }

    fn spawn(&mut self) {
        let worker = PollWorker {
            shared: self.shared.clone(),
            target: self.target.clone(),
            control_fd: self.control_rx.as_raw_fd(),
            ack_fd: self.ack_tx.as_raw_fd(),
        };

        let spawned = thread::Builder::new()
            .name("flagpoll-poll".into())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                tracing::debug!(message = "flagpoll: poll thread started");
                self.handle = Some(handle);
            }
            Err(e) => fatal("poll thread spawn", e),
        }
    }

    fn request(&self, request: ControlRequest) {
        write_byte(self.control_tx.as_raw_fd(), request as u8, "poll thread request");
    }

    /// Blocks until the helper acknowledges a PAUSE request.
    fn wait_ack(&self) {
        let fd = self.ack_rx.as_raw_fd();
        let mut byte = [0u8; 1];

        loop {
            match sys_read(fd, &mut byte) {
                Ok(1) => return,
                Ok(_) => fatal("poll thread ack", io::ErrorKind::UnexpectedEof.into()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    block_readable(fd, "poll thread ack")
                }
                Err(e) => fatal("poll thread ack", e),
            }
        }
    }
}

impl PauseGate for PollThread {
    fn pause_if_running(&mut self) {
        if self.handle.is_none() || self.paused {
            return;
        }

        self.paused = true;
        self.request(ControlRequest::Pause);
        self.wait_ack();

        tracing::trace!(message = "flagpoll: poll thread paused");
    }
}

/// State owned by the helper thread.
struct PollWorker {
    shared: Arc<Shared>,
    target: Arc<PollTarget>,
    control_fd: RawFd,
    ack_fd: RawFd,
}

impl PollWorker {
    fn run(self) {
        let mut state = ControlRequest::Poll;

        loop {
            match self.drain_control() {
                Ok(Some(request)) => {
                    if request == ControlRequest::Pause {
                        write_byte(self.ack_fd, 1, "poll thread ack");
                    }
                    state = request;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(message = "flagpoll: control channel closed", error = %e);
                    return;
                }
            }

            match state {
                ControlRequest::Poll => {
                    if self.shared.flags.is_set(PENDING_POLL) {
                        // The loop thread has not consumed the last batch yet.
                        state = ControlRequest::Pause;
                        continue;
                    }

                    if self.poll_all() {
                        state = ControlRequest::Pause;
                        self.shared.escalate(PENDING_POLL);
                    }
                }
                ControlRequest::Pause => block_readable(self.control_fd, "poll thread pause"),
                ControlRequest::Exit => {
                    tracing::debug!(message = "flagpoll: poll thread exiting");
                    return;
                }
            }
        }
    }

    /// Blocks on the whole FD set. Returns `true` if anything besides the
    /// control channel signaled.
    fn poll_all(&self) -> bool {
        let fds = self.target.fds.load(Ordering::Acquire);
        let len = self.target.len.load(Ordering::Relaxed);

        // SAFETY: the loop thread only reallocates or writes the array after
        // a pause has been acknowledged, or after PENDING_POLL was escalated
        // below, and republishes it before every resume. Until then this
        // thread has exclusive use of the published entries.
        let ready = match unsafe { sys_poll_raw(fds, len, -1) } {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return false,
            Err(e) => fatal("poll thread wait", e),
        };

        let control_revents = unsafe { (*fds.add(CONTROL_SLOT)).revents };

        ready > 1 || (ready > 0 && control_revents == 0)
    }

    /// Reads every queued control byte and returns the last one.
    fn drain_control(&self) -> io::Result<Option<ControlRequest>> {
        let mut buf = [0u8; 16];
        let mut last = None;

        loop {
            match sys_read(self.control_fd, &mut buf) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    last = Some(ControlRequest::from_byte(buf[n - 1]));
                    if n < buf.len() {
                        return Ok(last);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(last),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn write_byte(fd: RawFd, byte: u8, operation: &'static str) {
    loop {
        match sys_write(fd, &[byte]) {
            Ok(_) => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
            Err(e) => fatal(operation, e),
        }
    }
}

/// Blocks until `fd` is readable.
fn block_readable(fd: RawFd, operation: &'static str) {
    let mut fds = [pollfd {
        fd,
        events: POLLIN,
        revents: 0,
    }];

    match sys_poll(&mut fds, -1) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
        Err(e) => fatal(operation, e),
    }
}
