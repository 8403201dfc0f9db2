//! OTA Core - Hardware-independent firmware update logic
//!
//! Everything between "an HTTP request arrived" and "the device restarts into
//! the new image" lives here behind small traits ([`Transport`],
//! [`PartitionTable`], [`FlashWriter`], [`Restarter`]), so the whole update
//! flow can be exercised on the host without ESP32 hardware.

pub mod api;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod handler;
pub mod image;
pub mod lifecycle;
pub mod mem;
pub mod partition;
pub mod restart;
pub mod session;
pub mod testing;
pub mod transport;
pub mod validator;
pub mod writer;

pub use config::{ConfigError, OtaConfig, ReceivePolicy};
pub use error::{FinishError, FlashError, OtaError, TransportError};
pub use handler::{OtaHandler, Outcome};
pub use lifecycle::{NoopObserver, OtaObserver};
pub use partition::{PartitionDescriptor, PartitionLabel, PartitionTable};
pub use restart::Restarter;
pub use session::{SessionSlot, SessionSnapshot, SessionState};
pub use transport::Transport;
pub use writer::{FlashWriter, StreamingWriter};
