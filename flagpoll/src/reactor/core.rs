use super::async_handle::{AsyncCallback, AsyncHandle, AsyncSlot};
use super::completion::CompletionQueue;
use super::fdset::{FdSet, INVALID_FD};
use super::flags::{PENDING_ASYNC, PENDING_COMPLETION, PENDING_POLL, PendingFlags};
use super::poll_thread::PollThread;
use super::poller::platform::sys_poll;
use super::signal::{OneShotTimer, WakeSignal};
use super::watcher::{Events, IoCallback, Watcher};
use crate::error::LoopError;
use crate::runtime::builder::{LoopBuilder, LoopConfig};
use crate::runtime::metrics::{LoopMetrics, Metrics};
use crate::runtime::time::{hrtime, init};

use libc::{POLLIN, POLLNVAL, pollfd};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// A completion posted from another thread through [`Remote::post`].
pub(crate) type Completion = Box<dyn FnOnce(&mut Loop) + Send>;

/// State reachable from every thread.
pub(crate) struct Shared {
    pub(crate) flags: PendingFlags,
    pub(crate) signal: WakeSignal,
    pub(crate) completions: CompletionQueue<Completion>,
}

impl Shared {
    /// Escalates `bit` into the pending flags, raising the wake signal on
    /// the first set.
    pub(crate) fn escalate(&self, bit: u32) -> bool {
        self.flags.escalate(bit, &self.signal)
    }
}

/// How long one driver call may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until something happens.
    Infinite,

    /// Collect whatever is ready and return.
    Immediate,

    /// Block for at most this long.
    After(Duration),
}

impl Timeout {
    /// Total blocking budget, `None` for no bound.
    fn budget(self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::Immediate => Some(Duration::ZERO),
            Timeout::After(d) => Some(d),
        }
    }
}

/// Thread-safe handle for posting completions to a loop.
#[derive(Clone)]
pub struct Remote {
    shared: Arc<Shared>,
}

impl Remote {
    /// Queues `completion` to run on the loop thread.
    ///
    /// Completions run in posting order, before any wakeup-channel or
    /// descriptor callback of the same cycle.
    pub fn post<F>(&self, completion: F)
    where
        F: FnOnce(&mut Loop) + Send + 'static,
    {
        self.shared.completions.push(Box::new(completion));
        self.shared.escalate(PENDING_COMPLETION);
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote").finish_non_exhaustive()
    }
}

/// The event-readiness backend of one event loop.
///
/// A `Loop` is driven from a single thread through [`poll_io`](Self::poll_io).
/// Other threads interact with it only through [`AsyncHandle`] and
/// [`Remote`].
pub struct Loop {
    shared: Arc<Shared>,

    /// Declared before `fds`: the helper thread must be joined before the
    /// array it polls is freed.
    poll_thread: PollThread,
    fds: FdSet,

    /// Descriptor-indexed watcher table.
    watchers: Vec<Option<Watcher>>,

    /// Watchers whose interest changed since the last driver call.
    watcher_queue: VecDeque<RawFd>,

    signal_fd: Option<RawFd>,

    async_handles: Vec<AsyncSlot>,

    /// Set while `run_async_handles` walks `async_handles` by index.
    dispatching_asyncs: bool,

    /// Cached loop time in milliseconds.
    time: u64,

    metrics: Metrics,
    config: LoopConfig,
}

impl Loop {
    /// Creates a loop with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`LoopBuilder::build`].
    pub fn new() -> Result<Self, LoopError> {
        LoopBuilder::new().build()
    }

    pub(crate) fn with_config(config: LoopConfig) -> Result<Self, LoopError> {
        init();

        let signal = WakeSignal::new().map_err(|source| LoopError::ResourceExhausted {
            resource: "wake signal",
            source,
        })?;

        let shared = Arc::new(Shared {
            flags: PendingFlags::new(),
            signal,
            completions: CompletionQueue::new(),
        });

        let poll_thread =
            PollThread::new(shared.clone()).map_err(|source| LoopError::ResourceExhausted {
                resource: "poll thread control channel",
                source,
            })?;

        let fds = FdSet::new(poll_thread.control_fd(), config.fd_capacity);

        let mut event_loop = Self {
            shared,
            poll_thread,
            fds,
            watchers: Vec::new(),
            watcher_queue: VecDeque::new(),
            signal_fd: None,
            async_handles: Vec::new(),
            dispatching_asyncs: false,
            time: 0,
            metrics: Metrics::new(config.metrics_idle_time),
            config,
        };
        event_loop.update_time();

        Ok(event_loop)
    }

    /// Returns a handle other threads can post completions through.
    pub fn remote(&self) -> Remote {
        Remote {
            shared: self.shared.clone(),
        }
    }

    /// Cached loop time in milliseconds, refreshed after every wait.
    pub fn now(&self) -> u64 {
        self.time
    }

    /// Refreshes the cached loop time.
    pub fn update_time(&mut self) {
        self.time = hrtime() / 1_000_000;
    }

    pub fn metrics(&self) -> LoopMetrics {
        self.metrics.snapshot()
    }

    /// Returns `true` once the poll helper thread has been started.
    pub fn is_poll_thread_running(&self) -> bool {
        self.poll_thread.is_running()
    }

    /// Number of descriptors in the interest set, the reserved control
    /// descriptor excluded.
    pub fn watched_fds(&self) -> usize {
        self.fds.len() - 1
    }

    /// Registers a wakeup handle. Nothing is dispatched until it is sent.
    pub fn async_init<F>(&mut self, callback: F) -> AsyncHandle
    where
        F: FnMut(&mut Loop, &AsyncHandle) + 'static,
    {
        let handle = AsyncHandle::new(self.shared.clone());
        let callback: AsyncCallback = Box::new(callback);

        self.async_handles.push(AsyncSlot {
            handle: handle.clone(),
            callback: Some(callback),
            closed: false,
        });

        handle
    }

    /// Closes a wakeup handle.
    ///
    /// Returns only once no concurrent [`AsyncHandle::send`] is in flight;
    /// the callback never runs again afterwards.
    pub fn async_close(&mut self, handle: &AsyncHandle) {
        let Some(index) = self.async_position(handle) else {
            return;
        };

        handle.spin_until_idle(self.config.spin_limit);

        if self.dispatching_asyncs {
            // Slots keep their index until the pass compacts them.
            let slot = &mut self.async_handles[index];
            slot.closed = true;
            slot.callback = None;
        } else {
            self.async_handles.remove(index);
        }
    }

    /// Starts watching `fd` for `events`.
    ///
    /// Starting an active watcher adds `events` to its interest and
    /// replaces its callback. The change reaches the interest set on the
    /// next [`poll_io`](Self::poll_io).
    ///
    /// # Panics
    ///
    /// Panics if `fd` is negative or `events` is empty.
    pub fn io_start<F>(&mut self, fd: RawFd, events: Events, callback: F)
    where
        F: FnMut(&mut Loop, RawFd, Events) + 'static,
    {
        assert!(fd >= 0, "fd must be >= 0");
        assert!(!events.is_empty(), "events must not be empty");

        let index = fd as usize;
        if self.watchers.len() <= index {
            self.watchers.resize_with(index + 1, || None);
        }

        let callback: IoCallback = Box::new(callback);
        let watcher = match self.watchers[index].take() {
            Some(mut watcher) => {
                watcher.callback = Some(callback);
                watcher
            }
            None => Watcher::new(callback),
        };

        let watcher = self.watchers[index].insert(watcher);
        watcher.pevents |= events;

        if !watcher.queued {
            watcher.queued = true;
            self.watcher_queue.push_back(fd);
        }
    }

    /// Installs the distinguished signal watcher on `fd`.
    ///
    /// When ready it is dispatched with [`Events::READABLE`] after every
    /// other watcher of the cycle, and the driver returns right after.
    pub fn signal_io_start<F>(&mut self, fd: RawFd, callback: F)
    where
        F: FnMut(&mut Loop, RawFd, Events) + 'static,
    {
        self.io_start(fd, Events::READABLE, callback);
        self.signal_fd = Some(fd);
    }

    /// Stops watching `fd` for `events`.
    ///
    /// With no interest left the watcher is dropped and the descriptor
    /// leaves the interest set.
    pub fn io_stop(&mut self, fd: RawFd, events: Events) {
        let Some(Some(watcher)) = usize::try_from(fd)
            .ok()
            .and_then(|index| self.watchers.get_mut(index))
        else {
            return;
        };

        watcher.pevents -= events;

        if !watcher.pevents.is_empty() {
            if !watcher.queued {
                watcher.queued = true;
                self.watcher_queue.push_back(fd);
            }
            return;
        }

        self.watchers[fd as usize] = None;
        self.watcher_queue.retain(|&queued| queued != fd);

        if self.signal_fd == Some(fd) {
            self.signal_fd = None;
        }

        self.invalidate_fd(fd);
    }

    /// Drops every interest in `fd`.
    pub fn io_close(&mut self, fd: RawFd) {
        self.io_stop(fd, Events::all());
    }

    /// Returns `true` if a watcher is registered for `fd`.
    pub fn is_watching(&self, fd: RawFd) -> bool {
        self.watcher(fd).is_some()
    }

    /// Checks whether `fd` can be watched with `poll(2)`.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::InvalidFd`] if the platform rejects the
    /// descriptor, or [`LoopError::Io`] if the probe itself fails.
    pub fn check_fd(&self, fd: RawFd) -> Result<(), LoopError> {
        let mut probe = [pollfd {
            fd,
            events: POLLIN,
            revents: 0,
        }];

        loop {
            match sys_poll(&mut probe, 0) {
                Ok(_) => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(LoopError::Io(e)),
            }
        }

        if probe[0].revents & POLLNVAL != 0 {
            return Err(LoopError::InvalidFd(fd));
        }

        Ok(())
    }

    /// Runs one iteration of readiness collection and dispatch.
    ///
    /// Blocks once on the wake signal per round, then dispatches, in this
    /// order: cross-thread completions, wakeup-channel handles, descriptor
    /// watchers, and finally the signal watcher. Rounds that dispatch
    /// nothing are repeated while `timeout` allows.
    pub fn poll_io(&mut self, timeout: Timeout) {
        self.update_time();
        self.drain_watcher_queue();

        let budget = timeout.budget();
        let mut remaining = budget;
        let start = hrtime();

        loop {
            if remaining != Some(Duration::ZERO) {
                self.metrics.set_provider_entry_time();
            }

            if self.fds.has_watched() {
                self.poll_thread.resume_or_start(&mut self.fds);
            }

            let mut timer = OneShotTimer::new();
            if let Some(after) = remaining {
                timer.arm(after);
            }

            self.shared.signal.wait(&timer);
            timer.cancel();

            self.update_time();

            // Clear before the swap: an escalation landing in between leaves
            // the signal set and is picked up by this swap or the next wait.
            self.shared.signal.clear();
            let pending = self.shared.flags.take();

            tracing::trace!(message = "flagpoll: woke", pending, ?remaining);

            let mut nevents = 0;
            let mut have_signals = false;

            if pending & PENDING_COMPLETION != 0 {
                nevents += self.run_completions();
            }

            if pending & PENDING_ASYNC != 0 {
                nevents += self.run_async_handles();
            }

            if pending & PENDING_POLL != 0 {
                let (n, signals) = self.run_io_watchers();
                nevents += n;
                have_signals = signals;
            }

            self.metrics.inc_events(nevents);

            if have_signals {
                if let Some(fd) = self.signal_fd {
                    self.metrics.update_idle_time();
                    self.invoke_watcher(fd, Events::READABLE);
                }
            }

            self.fds.purge(&mut self.poll_thread);

            if have_signals || nevents != 0 || remaining == Some(Duration::ZERO) {
                break;
            }

            let Some(budget) = budget else {
                continue;
            };

            // Measured from entry, not accumulated per round.
            let elapsed = Duration::from_nanos(hrtime().saturating_sub(start));
            match budget.checked_sub(elapsed) {
                Some(left) if !left.is_zero() => remaining = Some(left),
                _ => break,
            }
        }

        self.metrics.update_idle_time();
    }

    /// Moves queued watcher registrations into the interest set.
    fn drain_watcher_queue(&mut self) {
        while let Some(fd) = self.watcher_queue.pop_front() {
            let Some(Some(watcher)) = self.watchers.get_mut(fd as usize) else {
                continue;
            };

            watcher.queued = false;
            debug_assert!(!watcher.pevents.is_empty());

            // Already installed with this mask.
            if watcher.events == watcher.pevents {
                continue;
            }

            self.fds.add(fd, watcher.pevents.bits(), &mut self.poll_thread);
            watcher.events = watcher.pevents;
        }
    }

    fn run_completions(&mut self) -> usize {
        let completions = self.shared.completions.take_all();
        let n = completions.len();

        for completion in completions {
            self.metrics.update_idle_time();
            completion(self);
        }

        n
    }

    fn run_async_handles(&mut self) -> usize {
        let nested = std::mem::replace(&mut self.dispatching_asyncs, true);

        // Handles initialized by a callback are picked up next cycle.
        let len = self.async_handles.len();
        let mut nevents = 0;

        for index in 0..len {
            let slot = &mut self.async_handles[index];

            if slot.closed || !slot.handle.take_pending() {
                continue;
            }

            let Some(mut callback) = slot.callback.take() else {
                continue;
            };
            let handle = slot.handle.clone();

            self.metrics.update_idle_time();
            callback(self, &handle);
            nevents += 1;

            let slot = &mut self.async_handles[index];
            if !slot.closed {
                slot.callback.get_or_insert(callback);
            }
        }

        self.dispatching_asyncs = nested;
        if !nested {
            self.async_handles.retain(|slot| !slot.closed);
        }

        nevents
    }

    /// Dispatches the results the helper thread left in the interest set.
    ///
    /// Returns the number of dispatched watchers and whether the signal
    /// watcher is ready.
    fn run_io_watchers(&mut self) -> (usize, bool) {
        // The helper pauses itself after reporting.
        self.poll_thread.mark_paused();
        self.fds.set_iterating(true);

        let mut nevents = 0;
        let mut have_signals = false;

        // Slot 0 is the helper's control channel.
        for index in 1..self.fds.len() {
            let entry = self.fds.entry(index);
            let fd = entry.fd;

            if fd == INVALID_FD {
                continue;
            }

            let Some(pevents) = self.watcher(fd).map(|w| w.pevents) else {
                // Stopped watching; drop it at the purge.
                self.invalidate_fd(fd);
                continue;
            };

            // Drop what the owner did not ask for (POLLNVAL for instance).
            let wanted = pevents | Events::ERROR | Events::HANGUP;
            let revents = Events::from_bits_truncate(entry.revents) & wanted;
            self.fds.set_revents(index, revents.bits());

            if revents.is_empty() {
                continue;
            }

            if self.signal_fd == Some(fd) {
                have_signals = true;
            } else {
                self.metrics.update_idle_time();
                self.invoke_watcher(fd, revents);
            }

            nevents += 1;
        }

        self.fds.set_iterating(false);

        (nevents, have_signals)
    }

    fn invoke_watcher(&mut self, fd: RawFd, events: Events) {
        let Some(mut callback) = self.watcher_mut(fd).and_then(|w| w.callback.take()) else {
            return;
        };

        callback(self, fd, events);

        // Put it back unless the watcher was dropped or re-registered.
        if let Some(watcher) = self.watcher_mut(fd) {
            watcher.callback.get_or_insert(callback);
        }
    }

    /// Takes `fd` out of the interest set, or only marks it while the
    /// results are being walked.
    fn invalidate_fd(&mut self, fd: RawFd) {
        if self.fds.is_iterating() {
            self.fds.invalidate(fd, &mut self.poll_thread);
        } else {
            self.fds.remove(fd, &mut self.poll_thread);
        }
    }

    fn watcher(&self, fd: RawFd) -> Option<&Watcher> {
        usize::try_from(fd)
            .ok()
            .and_then(|index| self.watchers.get(index))
            .and_then(Option::as_ref)
    }

    fn watcher_mut(&mut self, fd: RawFd) -> Option<&mut Watcher> {
        usize::try_from(fd)
            .ok()
            .and_then(|index| self.watchers.get_mut(index))
            .and_then(Option::as_mut)
    }

    fn async_position(&self, handle: &AsyncHandle) -> Option<usize> {
        self.async_handles
            .iter()
            .position(|slot| !slot.closed && slot.handle.same(handle))
    }
}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loop")
            .field("time", &self.time)
            .field("watched_fds", &self.watched_fds())
            .field("fd_capacity", &self.fds.capacity())
            .field("completions_queued", &!self.shared.completions.is_empty())
            .field("async_handles", &self.async_handles.len())
            .field("poll_thread_running", &self.poll_thread.is_running())
            .field("poll_thread_paused", &self.poll_thread.is_paused())
            .finish_non_exhaustive()
    }
}

impl Drop for Loop {
    /// Stops and joins the helper thread before the interest set and the
    /// channels are released.
    fn drop(&mut self) {
        self.poll_thread.shutdown();
    }
}
