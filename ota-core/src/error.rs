//! Error types for the OTA handler

use thiserror::Error;

use crate::image::HeaderError;
use crate::session::SessionState;

/// Failures reported by the byte-stream transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The receive timed out; the same receive may be reissued.
    #[error("receive timed out")]
    Timeout,

    /// The peer closed the connection before the declared length arrived.
    #[error("connection closed prematurely")]
    Closed,

    /// Any other socket-level failure.
    #[error("transport error: {0}")]
    Io(String),
}

/// Failures reported by the flash driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// The platform driver returned an error code.
    #[error("driver error {code} ({name})")]
    Driver { code: i32, name: String },

    /// Anything else, described in text.
    #[error("{0}")]
    Other(String),
}

/// Failures from closing a write handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FinishError {
    /// The written image did not pass whole-image validation.
    #[error("image validation failed: {0}")]
    Validation(String),

    /// The handle could not be closed for another reason.
    #[error("{0}")]
    Flash(#[from] FlashError),
}

/// Every way an OTA session can end without committing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// Another session holds the admission slot.
    #[error("OTA already in progress")]
    Busy,

    /// Declared length is zero.
    #[error("empty firmware")]
    EmptyPayload,

    /// Declared length is below the minimum image size.
    #[error("firmware too small: {size} bytes (minimum {min})")]
    TooSmall { size: usize, min: usize },

    /// No partition other than the boot partition is available.
    #[error("no OTA partition available")]
    NoPartitionAvailable,

    /// Declared length does not fit into the target partition.
    #[error("firmware too large: {size} > {capacity} bytes")]
    TooLarge { size: usize, capacity: usize },

    /// The receive buffer could not be allocated.
    #[error("failed to allocate {0} byte receive buffer")]
    OutOfMemory(usize),

    /// The image header did not parse or carried the wrong magic.
    #[error("invalid firmware format: {0}")]
    InvalidFormat(HeaderError),

    /// The write handle could not be opened.
    #[error("OTA begin failed: {0}")]
    BeginFailed(FlashError),

    /// Programming a chunk failed.
    #[error("flash write failed at offset {offset}: {source}")]
    FlashWriteFailed { offset: usize, source: FlashError },

    /// More bytes arrived than the declared length.
    #[error("stream exceeds declared length of {expected} bytes")]
    Overrun { expected: usize },

    /// Whole-image validation rejected the written image.
    #[error("firmware validation failed: {0}")]
    ValidationFailed(String),

    /// Closing the write handle failed for a reason other than validation.
    #[error("OTA finalize failed: {0}")]
    FinalizeFailed(String),

    /// The image is valid but the boot pointer could not be switched.
    #[error("set boot partition failed: {0}")]
    BootSwitchFailed(FlashError),

    /// Too many consecutive receive timeouts, or the transfer deadline passed.
    #[error("receive timed out after {retries} retries")]
    ReceiveTimeout { retries: u32 },

    /// The connection closed or failed mid-transfer.
    #[error(transparent)]
    Transport(TransportError),

    /// A state transition the session does not allow.
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

impl OtaError {
    /// HTTP status code of the terminal response.
    pub fn status_code(&self) -> u16 {
        match self {
            OtaError::Busy => 409,
            OtaError::EmptyPayload
            | OtaError::TooSmall { .. }
            | OtaError::TooLarge { .. }
            | OtaError::InvalidFormat(_)
            | OtaError::Overrun { .. }
            | OtaError::ValidationFailed(_) => 400,
            OtaError::ReceiveTimeout { .. } => 408,
            OtaError::Transport(TransportError::Closed) => 400,
            OtaError::NoPartitionAvailable
            | OtaError::OutOfMemory(_)
            | OtaError::BeginFailed(_)
            | OtaError::FlashWriteFailed { .. }
            | OtaError::FinalizeFailed(_)
            | OtaError::BootSwitchFailed(_)
            | OtaError::Transport(_)
            | OtaError::InvalidTransition { .. } => 500,
        }
    }

    /// User-visible message of the terminal response.
    pub fn message(&self) -> &'static str {
        match self {
            OtaError::Busy => "OTA already in progress",
            OtaError::EmptyPayload => "Empty firmware",
            OtaError::TooSmall { .. } => "Firmware too small",
            OtaError::NoPartitionAvailable => "No OTA partition",
            OtaError::TooLarge { .. } => "Firmware too large for partition",
            OtaError::OutOfMemory(_) => "Out of memory",
            OtaError::InvalidFormat(_) => "Invalid firmware format",
            OtaError::BeginFailed(_) => "OTA begin failed",
            OtaError::FlashWriteFailed { .. } => "Flash write failed",
            OtaError::Overrun { .. } => "Firmware exceeds declared length",
            OtaError::ValidationFailed(_) => "Firmware validation failed",
            OtaError::FinalizeFailed(_) => "OTA finalize failed",
            OtaError::BootSwitchFailed(_) => "Set boot partition failed",
            OtaError::ReceiveTimeout { .. } => "Receive timeout",
            OtaError::Transport(TransportError::Closed) => "Connection closed prematurely",
            OtaError::Transport(_) => "Receive failed",
            OtaError::InvalidTransition { .. } => "Internal error",
        }
    }

    /// Terminal state a session takes when it ends with this error.
    ///
    /// Transport-side terminations abort; everything else fails.
    pub fn terminal_state(&self) -> SessionState {
        match self {
            OtaError::ReceiveTimeout { .. } | OtaError::Transport(_) => SessionState::Aborted,
            _ => SessionState::Failed,
        }
    }
}

impl From<TransportError> for OtaError {
    fn from(e: TransportError) -> Self {
        OtaError::Transport(e)
    }
}

impl From<HeaderError> for OtaError {
    fn from(e: HeaderError) -> Self {
        OtaError::InvalidFormat(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_table_matches() {
        let cases = [
            (OtaError::EmptyPayload, 400, "Empty firmware"),
            (OtaError::TooSmall { size: 100, min: 256 }, 400, "Firmware too small"),
            (OtaError::NoPartitionAvailable, 500, "No OTA partition"),
            (
                OtaError::TooLarge { size: 2, capacity: 1 },
                400,
                "Firmware too large for partition",
            ),
            (OtaError::OutOfMemory(4096), 500, "Out of memory"),
            (
                OtaError::InvalidFormat(HeaderError::BadMagic { found: 0 }),
                400,
                "Invalid firmware format",
            ),
            (
                OtaError::FlashWriteFailed { offset: 0, source: FlashError::Other("x".into()) },
                500,
                "Flash write failed",
            ),
            (OtaError::ValidationFailed("x".into()), 400, "Firmware validation failed"),
            (
                OtaError::BootSwitchFailed(FlashError::Other("x".into())),
                500,
                "Set boot partition failed",
            ),
        ];
        for (err, status, message) in cases {
            assert_eq!(err.status_code(), status, "{err:?}");
            assert_eq!(err.message(), message, "{err:?}");
        }
    }

    #[test]
    fn transport_errors_abort() {
        assert_eq!(
            OtaError::Transport(TransportError::Closed).terminal_state(),
            SessionState::Aborted
        );
        assert_eq!(OtaError::ReceiveTimeout { retries: 3 }.terminal_state(), SessionState::Aborted);
        assert_eq!(OtaError::EmptyPayload.terminal_state(), SessionState::Failed);
    }
}
