//! Internal utilities.
//!
//! Small building blocks that are not tied to a specific part of the loop.

pub(crate) mod backoff;
