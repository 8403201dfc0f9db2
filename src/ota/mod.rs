// OTA glue between ota-core and ESP-IDF
//
// Update flow (driven by ota_core::OtaHandler):
// 1. Admit the request and check the declared size
// 2. Select the inactive app partition
// 3. Check the image header, then stream chunks into flash
// 4. Validate the image and set the boot partition
// 5. Respond, then restart

pub mod backend;
pub mod observer;
pub mod restart;
pub mod transport;

pub use backend::EspOtaBackend;
pub use observer::LoggingObserver;
pub use restart::EspRestarter;
pub use transport::HttpTransport;
