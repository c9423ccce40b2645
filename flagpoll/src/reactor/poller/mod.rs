//! Platform-specific readiness primitives.
//!
//! The backend targets platforms whose only readiness multiplexer is the
//! small-fixed-set `poll(2)` call. Everything the reactor needs from the
//! operating system goes through the thin wrappers in [`unix`]:
//! - non-blocking pipes (wake signal and helper-thread control channel),
//! - byte reads and writes on those pipes,
//! - the blocking `poll(2)` wait itself.

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;
