//! Readiness backend.
//!
//! This module implements the event-readiness core of the loop.
//! The reactor is responsible for:
//! - suspending the loop thread on a single wake signal,
//! - collecting cross-thread wakeups and completions,
//! - delegating descriptor readiness to the poll helper thread.
//!
//! Every source of work escalates one bit of the pending flags and raises
//! the wake signal on the bit's first set. The loop thread clears the
//! signal, swaps the flags to zero and dispatches whatever the bits name.

mod core;
mod poller;

pub(crate) mod async_handle;
pub(crate) mod completion;
pub(crate) mod fdset;
pub(crate) mod flags;
pub(crate) mod poll_thread;
pub(crate) mod signal;
pub(crate) mod watcher;

pub use async_handle::AsyncHandle;
pub use self::core::{Loop, Remote, Timeout};
pub use watcher::Events;
