use anyhow::{Context, Result};
use ota_core::OtaConfig;
use serde::Serialize;

use crate::version;

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    #[serde(skip_serializing)]
    pub wifi_password: String,

    pub log_level: String,

    // OTA server settings
    pub ota: OtaConfig,
}

impl Default for Config {
    fn default() -> Self {
        // Get WiFi credentials from environment variables set by build.rs
        // These come from wifi_config.h which should NOT be committed to git
        let wifi_ssid = env!("WIFI_SSID");
        let wifi_password = env!("WIFI_PASSWORD");

        Self {
            wifi_ssid: wifi_ssid.to_string(),
            wifi_password: wifi_password.to_string(),
            log_level: option_env!("OTA_LOG_LEVEL").unwrap_or("info").to_string(),
            ota: OtaConfig::with_version(version::CARGO_VERSION),
        }
    }
}

/// Build the runtime configuration: compiled-in defaults, then the optional
/// `OTA_CONFIG_JSON` override captured at build time.
pub fn load() -> Result<Config> {
    let mut config = Config::default();

    if let Some(json) = option_env!("OTA_CONFIG_JSON") {
        config.ota = parse_ota_override(json)?;
        log::info!("Applied OTA_CONFIG_JSON override");
    }

    config.ota.validate().context("Invalid OTA configuration")?;

    log::info!(
        "Config: SSID='{}', Password={}, OTA port {}",
        config.wifi_ssid,
        if config.wifi_password.is_empty() { "<empty>" } else { "<set>" },
        config.ota.port
    );
    Ok(config)
}

/// Fields missing from `json` keep their defaults; the firmware version
/// defaults to the package version rather than a placeholder.
fn parse_ota_override(json: &str) -> Result<OtaConfig> {
    let value: serde_json::Value =
        serde_json::from_str(json).context("OTA_CONFIG_JSON is not valid JSON")?;
    let mut ota: OtaConfig =
        serde_json::from_value(value.clone()).context("OTA_CONFIG_JSON has bad field types")?;
    if value.get("firmware_version").is_none() {
        ota.firmware_version = version::CARGO_VERSION.to_string();
    }
    Ok(ota)
}
