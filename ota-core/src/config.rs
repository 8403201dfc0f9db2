/// OTA server configuration that can be tested independently
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::HEADER_LEN;

/// Version strings longer than this are rejected.
pub const MAX_VERSION_LEN: usize = 31;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    pub port: u16,
    pub firmware_version: String,
    /// Upper bound of one receive/write cycle.
    pub chunk_size: usize,
    pub min_firmware_size: usize,
    pub progress_log_interval: usize,
    /// Pause between the success response and the restart.
    pub restart_delay_ms: u64,
    pub http_stack_size: usize,
    pub receive: ReceivePolicy,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            firmware_version: "0.0.0".to_string(),
            chunk_size: 4096,
            min_firmware_size: 256,
            progress_log_interval: 64 * 1024,
            restart_delay_ms: 500,
            http_stack_size: 8192,
            receive: ReceivePolicy::default(),
        }
    }
}

/// Bounds on retrying timed-out receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReceivePolicy {
    /// Consecutive timeouts tolerated before the session aborts.
    pub max_timeout_retries: u32,
    /// Overall transfer deadline in seconds; `None` disables it.
    pub transfer_timeout_secs: Option<u64>,
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        Self {
            max_timeout_retries: 20,
            transfer_timeout_secs: Some(600),
        }
    }
}

impl ReceivePolicy {
    pub fn transfer_timeout(&self) -> Option<Duration> {
        self.transfer_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk size {chunk_size} is smaller than the {header_len} byte image header")]
    ChunkTooSmall { chunk_size: usize, header_len: usize },

    #[error("minimum firmware size {0} is smaller than the image header")]
    MinimumBelowHeader(usize),

    #[error("firmware version must be 1..={max} characters, got {len}")]
    BadVersion { len: usize, max: usize },
}

impl OtaConfig {
    pub fn with_version(version: &str) -> Self {
        Self { firmware_version: version.to_string(), ..Self::default() }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size < HEADER_LEN {
            return Err(ConfigError::ChunkTooSmall {
                chunk_size: self.chunk_size,
                header_len: HEADER_LEN,
            });
        }
        if self.min_firmware_size < HEADER_LEN {
            return Err(ConfigError::MinimumBelowHeader(self.min_firmware_size));
        }
        let len = self.firmware_version.len();
        if len == 0 || len > MAX_VERSION_LEN {
            return Err(ConfigError::BadVersion { len, max: MAX_VERSION_LEN });
        }
        Ok(())
    }
}
