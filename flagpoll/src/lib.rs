//! # Flagpoll
//!
//! **Flagpoll** is the event-readiness backend of a single-threaded event loop.
//!
//! The loop thread has exactly one suspension point: a wake signal. Everything
//! that can wake it, whether a cross-thread wakeup, a posted completion or
//! descriptor readiness, records itself in a small bitmask of pending flags
//! and raises the signal once. Descriptor readiness is collected by a
//! dedicated helper thread running `poll(2)` over the interest set.
//!
//! It offers:
//!
//! - **Coalescing wakeups** through [`AsyncHandle`], safe to send from any thread
//! - **Cross-thread completions** posted through [`Remote`]
//! - **Descriptor watchers** with [`Events`] interest masks
//! - A **bounded driver**, [`Loop::poll_io`], with [`Timeout`] budgets
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flagpoll::{Loop, Timeout};
//! use std::time::Duration;
//!
//! let mut event_loop = Loop::new().expect("loop");
//!
//! let handle = event_loop.async_init(|_, _| println!("woken"));
//!
//! let sender = handle.clone();
//! std::thread::spawn(move || sender.send());
//!
//! event_loop.poll_io(Timeout::After(Duration::from_secs(1)));
//! event_loop.async_close(&handle);
//! ```
//!
//! ## Modules
//!
//! - `reactor`: Wake signal, pending flags, FD set and the poll helper thread
//! - `runtime`: Loop configuration, clock and accounting
//! - `error`: Error kinds and the fatal-failure path

#[cfg(not(unix))]
compile_error!("flagpoll requires a unix platform with poll(2)");

mod error;
mod reactor;
mod runtime;
mod utils;

pub use error::{ErrorKind, LoopError};
pub use reactor::{AsyncHandle, Events, Loop, Remote, Timeout};
pub use runtime::builder::LoopBuilder;
pub use runtime::metrics::LoopMetrics;
pub use runtime::time::{hrtime, init};
