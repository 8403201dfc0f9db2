use anyhow::Result;
use log::info;

// Generate ESP-IDF app descriptor
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
#[cfg(target_os = "espidf")]
mod network;
#[cfg(target_os = "espidf")]
mod ota;
mod version;

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use std::sync::Arc;

    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;

    use crate::network::{OtaServer, WifiManager};
    use crate::ota::LoggingObserver;

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    logging::init_logger()?;

    let config = config::load()?;
    if !logging::set_max_level_from_str(&config.log_level) {
        log::warn!("Unknown log level '{}', keeping info", config.log_level);
    }

    info!("{} starting", version::full_version());
    info!("Free heap: {} bytes", unsafe { esp_idf_sys::esp_get_free_heap_size() });

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;

    let mut wifi = WifiManager::new(
        peripherals.modem,
        sys_loop,
        &config.wifi_ssid,
        &config.wifi_password,
    )?;
    wifi.connect()?;

    let server = OtaServer::start(config.ota.clone(), Arc::new(LoggingObserver::new()))?;
    info!(
        "Ready for updates: POST http://{}:{}/ota (running {})",
        wifi.get_ip().unwrap_or_default(),
        config.ota.port,
        server.version()
    );

    debug_assert!(OtaServer::is_running());

    // WiFi and the server live as long as main
    loop {
        FreeRtos::delay_ms(10_000);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    logging::init_logger()?;

    let config = config::load()?;
    logging::set_max_level_from_str(&config.log_level);

    info!("{} (host build)", version::full_version());
    info!("Resolved configuration: {}", serde_json::to_string(&config)?);
    log::warn!("The OTA server only runs on ESP-IDF targets; use ota-tool or host-tests on the host");
    Ok(())
}
