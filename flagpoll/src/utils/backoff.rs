use std::hint;
use std::thread;

/// Default number of relax iterations between two yields.
///
/// A prime, so the spinning side does not fall into lockstep with a peer
/// running a loop of similar length.
pub(crate) const DEFAULT_SPIN_LIMIT: u32 = 997;

/// Busy-waits until `done` returns `true`.
///
/// Checks `done` up to `spin_limit` times with a CPU relax hint in between,
/// then yields the CPU to let a preempted peer finish, and starts over.
pub(crate) fn spin_then_yield(spin_limit: u32, mut done: impl FnMut() -> bool) {
    loop {
        for _ in 0..spin_limit {
            if done() {
                return;
            }
            hint::spin_loop();
        }

        thread::yield_now();
    }
}
