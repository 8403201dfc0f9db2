//! Lifecycle hooks fired by the OTA handler

use log::info;

/// Observer of one OTA session.
///
/// Every hook defaults to a no-op, so implementors override only what they
/// need. Hooks run on the handler's thread and should return quickly.
pub trait OtaObserver: Send + Sync {
    /// Immediately before the first flash write.
    fn on_start(&self) {}

    /// After every successfully written chunk.
    fn on_progress(&self, _received: usize, _total: usize) {}

    /// After the boot switch, before the restart.
    fn on_complete(&self) {}

    /// Once, on any terminal failure of an admitted session.
    fn on_fail(&self, _reason: &str) {}
}

/// Observer used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl OtaObserver for NoopObserver {}

/// Emits a progress log line each time the written total crosses another
/// `interval` bytes.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    interval: usize,
    next: usize,
}

impl ProgressLog {
    pub fn new(interval: usize) -> Self {
        let interval = interval.max(1);
        Self { interval, next: interval }
    }

    /// Returns `true` when a line was logged.
    pub fn record(&mut self, received: usize, total: usize) -> bool {
        if received < self.next && received < total {
            return false;
        }
        let percent = if total == 0 { 100 } else { received * 100 / total };
        info!("Progress: {} / {} bytes ({}%)", received, total, percent);
        // Skip every boundary already passed by a large chunk.
        self.next = (received / self.interval + 1) * self.interval;
        true
    }
}
