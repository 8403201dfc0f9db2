// Centralized version information

// Cargo package version from Cargo.toml; this is what /version reports
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

// Short build tag shown in the boot banner
pub const DISPLAY_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"), "-rust");

// Full version string including the package name
pub fn full_version() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), DISPLAY_VERSION)
}

// ESP-IDF release string, e.g. "v5.2.2"
#[cfg(target_os = "espidf")]
pub fn idf_version() -> Option<String> {
    let ptr = unsafe { esp_idf_sys::esp_get_idf_version() };
    if ptr.is_null() {
        return None;
    }
    let version = unsafe { std::ffi::CStr::from_ptr(ptr) };
    Some(version.to_string_lossy().into_owned())
}
