use super::time::hrtime;

use std::time::Duration;

/// Snapshot of loop accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopMetrics {
    /// Callbacks dispatched by the driver.
    pub events: u64,

    /// Time spent blocked in the wake-signal wait. Stays zero unless the
    /// loop was built with [`metrics_idle_time`](crate::LoopBuilder::metrics_idle_time).
    pub idle_time: Duration,
}

pub(crate) struct Metrics {
    idle_time_enabled: bool,

    /// `hrtime()` when the driver entered a blocking wait.
    provider_entry_time: Option<u64>,

    snapshot: LoopMetrics,
}

impl Metrics {
    pub(crate) fn new(idle_time_enabled: bool) -> Self {
        Self {
            idle_time_enabled,
            provider_entry_time: None,
            snapshot: LoopMetrics::default(),
        }
    }

    pub(crate) fn set_provider_entry_time(&mut self) {
        if self.idle_time_enabled && self.provider_entry_time.is_none() {
            self.provider_entry_time = Some(hrtime());
        }
    }

    pub(crate) fn update_idle_time(&mut self) {
        if let Some(entry) = self.provider_entry_time.take() {
            let idle = hrtime().saturating_sub(entry);
            self.snapshot.idle_time += Duration::from_nanos(idle);
        }
    }

    pub(crate) fn inc_events(&mut self, n: usize) {
        self.snapshot.events += n as u64;
    }

    pub(crate) fn snapshot(&self) -> LoopMetrics {
        self.snapshot
    }
}
