//! Loop configuration and accounting.
//!
//! This module holds what surrounds the reactor without taking part in its
//! coordination:
//! - the [`LoopBuilder`](builder::LoopBuilder) configuration layer,
//! - the monotonic clock and process-wide setup,
//! - event and idle-time accounting.

pub(crate) mod builder;
pub(crate) mod metrics;
pub(crate) mod time;
