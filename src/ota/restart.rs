use std::time::Duration;

use esp_idf_hal::delay::FreeRtos;
use ota_core::Restarter;

/// Waits for the response to drain, then hard-restarts the chip.
#[derive(Debug, Default)]
pub struct EspRestarter;

impl Restarter for EspRestarter {
    fn restart_after(&self, delay: Duration) {
        FreeRtos::delay_ms(delay.as_millis().min(u32::MAX as u128) as u32);
        log::info!("Restarting system...");
        unsafe { esp_idf_sys::esp_restart() };
    }
}
