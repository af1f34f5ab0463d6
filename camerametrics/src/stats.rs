//! Run statistics for the poll loop.

use std::sync::Arc;

use parking_lot::RwLock;

/// Counters describing what the poll loop has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExporterStats {
    /// Poll cycles started.
    pub cycles: u64,
    /// Cycles whose response carried camera data.
    pub cycles_with_data: u64,
    /// Cycles whose response had no `data` list.
    pub empty_responses: u64,
    /// Cycles that exhausted every fetch attempt.
    pub fetch_failures: u64,
    /// Camera records applied to the metric set.
    pub records_applied: u64,
    /// Successful pushes to the gateway.
    pub pushes: u64,
    /// Failed pushes to the gateway.
    pub push_failures: u64,
}

/// Thread-safe statistics recorder shared between the loop and the HTTP server.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: RwLock<ExporterStats>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update to the counters.
    pub fn update(&self, f: impl FnOnce(&mut ExporterStats)) {
        f(&mut *self.inner.write());
    }

    /// Snapshot of the current counters.
    pub fn snapshot(&self) -> ExporterStats {
        self.inner.read().clone()
    }
}

/// Create a shareable stats handle.
pub type SharedStats = Arc<StatsRecorder>;
