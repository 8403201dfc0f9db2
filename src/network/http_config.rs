use esp_idf_svc::http::server::Configuration;
use ota_core::OtaConfig;

/// HTTP server configuration for the OTA endpoints
pub fn create_http_config(ota: &OtaConfig) -> Configuration {
    Configuration {
        http_port: ota.port,
        stack_size: ota.http_stack_size, // Firmware upload needs the larger stack
        max_uri_handlers: 8,
        max_open_sockets: 4,
        max_resp_headers: 8,

        // Close idle connections before refusing new ones
        lru_purge_enable: true,

        // Needed for the catch-all 404 route
        uri_match_wildcard: true,

        ..Default::default()
    }
}
