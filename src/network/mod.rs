pub mod http_config;
pub mod web_server;
pub mod wifi;

pub use web_server::OtaServer;
pub use wifi::WifiManager;
