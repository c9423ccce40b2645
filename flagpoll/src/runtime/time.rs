//! Process-wide setup and the monotonic clock.

use std::sync::{Once, OnceLock};
use std::time::Instant;

static INIT: Once = Once::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Performs the process-wide setup shared by every loop.
///
/// Idempotent; loops call it implicitly when they are built.
pub fn init() {
    INIT.call_once(|| {
        EPOCH.get_or_init(Instant::now);
        tracing::debug!(message = "flagpoll: initialized", backend = "poll(2) helper thread");
    });
}

/// Monotonic time in nanoseconds since [`init`].
pub fn hrtime() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
