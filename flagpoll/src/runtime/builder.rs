use crate::error::LoopError;
use crate::reactor::Loop;
use crate::utils::backoff::DEFAULT_SPIN_LIMIT;

/// Initial number of FD set slots, the reserved control slot included.
const DEFAULT_FD_CAPACITY: usize = 64;

/// Settings a loop is built with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopConfig {
    pub(crate) spin_limit: u32,
    pub(crate) fd_capacity: usize,
    pub(crate) metrics_idle_time: bool,
}

/// Builder for configuring and creating a loop.
///
/// # Examples
///
/// ```rust,ignore
/// let event_loop = LoopBuilder::new()
///     .fd_capacity(256)
///     .metrics_idle_time(true)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct LoopBuilder {
    config: LoopConfig,
}

impl LoopBuilder {
    /// Creates a new `LoopBuilder` with default configuration.
    pub fn new() -> Self {
        Self {
            config: LoopConfig {
                spin_limit: DEFAULT_SPIN_LIMIT,
                fd_capacity: DEFAULT_FD_CAPACITY,
                metrics_idle_time: false,
            },
        }
    }

    /// Sets how many times closing a wakeup handle polls for in-flight
    /// senders before yielding the CPU.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn spin_limit(mut self, n: u32) -> Self {
        assert!(n > 0, "spin_limit must be > 0");

        self.config.spin_limit = n;
        self
    }

    /// Sets the initial capacity of the descriptor-interest set.
    ///
    /// The set still doubles when it fills up.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn fd_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "fd_capacity must be > 0");

        self.config.fd_capacity = n;
        self
    }

    /// Enables idle-time accounting in [`Loop::metrics`].
    pub fn metrics_idle_time(mut self, enabled: bool) -> Self {
        self.config.metrics_idle_time = enabled;
        self
    }

    /// Builds the loop with the configured options.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::ResourceExhausted`] if the wake signal or the
    /// helper-thread channels cannot be reserved.
    pub fn build(self) -> Result<Loop, LoopError> {
        Loop::with_config(self.config)
    }
}

impl Default for LoopBuilder {
    /// Creates a default `LoopBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
