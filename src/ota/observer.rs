use std::sync::atomic::{AtomicUsize, Ordering};

use ota_core::OtaObserver;

/// Observer that reports session milestones to the log.
///
/// The handler already logs byte counts every 64 KiB; this only echoes
/// quarter marks.
#[derive(Debug, Default)]
pub struct LoggingObserver {
    last_quarter: AtomicUsize,
}

impl LoggingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OtaObserver for LoggingObserver {
    fn on_start(&self) {
        self.last_quarter.store(0, Ordering::Relaxed);
        log::info!("OTA update started");
    }

    fn on_progress(&self, received: usize, total: usize) {
        if total == 0 {
            return;
        }
        let quarter = received * 4 / total;
        if self.last_quarter.swap(quarter, Ordering::Relaxed) != quarter && quarter > 0 {
            log::info!("OTA {}% written", quarter * 25);
        }
    }

    fn on_complete(&self) {
        log::info!("OTA update complete");
    }

    fn on_fail(&self, reason: &str) {
        log::error!("OTA update failed: {}", reason);
    }
}
