use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF; host builds only compile the stub binary
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    println!("cargo:rerun-if-changed=wifi_config.h");
    println!("cargo:rerun-if-env-changed=OTA_CONFIG_JSON");
    println!("cargo:rerun-if-env-changed=OTA_LOG_LEVEL");

    // Read WiFi configuration if it exists
    let wifi_config_path = "wifi_config.h";
    if Path::new(wifi_config_path).exists() {
        let contents = fs::read_to_string(wifi_config_path)?;

        // Parse SSID and password; a missing define falls back to empty
        let ssid = define_value(&contents, "WIFI_SSID").unwrap_or_default();
        let pass = define_value(&contents, "WIFI_PASSWORD").unwrap_or_default();
        println!("cargo:rustc-env=WIFI_SSID={}", ssid);
        println!("cargo:rustc-env=WIFI_PASSWORD={}", pass);
    } else {
        // Use empty defaults if no config file
        println!("cargo:rustc-env=WIFI_SSID=");
        println!("cargo:rustc-env=WIFI_PASSWORD=");
        println!("cargo:warning=wifi_config.h not found! Copy wifi_config.h.example to wifi_config.h and add your credentials.");
    }

    Ok(())
}

fn define_value<'a>(contents: &'a str, name: &str) -> Option<&'a str> {
    let directive = format!("#define {}", name);
    contents
        .lines()
        .find(|l| l.trim_start().starts_with(&directive))
        .and_then(|l| l.split('"').nth(1))
}
