//! Pre-write checks on the declared length and the image header

use log::error;

use crate::error::OtaError;
use crate::image::{FirmwareHeader, HeaderError, HEADER_LEN};

/// Check the declared payload length before touching any partition.
pub fn validate_length(declared: usize, min: usize) -> Result<(), OtaError> {
    if declared == 0 {
        error!("Empty firmware");
        return Err(OtaError::EmptyPayload);
    }
    if declared < min {
        error!("Firmware too small: {} bytes", declared);
        return Err(OtaError::TooSmall { size: declared, min });
    }
    Ok(())
}

/// Outcome of inspecting the bytes received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCheck {
    /// Fewer than [`HEADER_LEN`] bytes so far; receive more and retry.
    NeedMore(usize),
    Valid(FirmwareHeader),
}

/// Validate the image header at the start of `prefix`.
///
/// Never reads past `prefix`; a short prefix defers the decision.
pub fn validate_header(prefix: &[u8]) -> Result<HeaderCheck, OtaError> {
    match FirmwareHeader::parse(prefix) {
        Ok(header) => Ok(HeaderCheck::Valid(header)),
        Err(HeaderError::Truncated { .. }) => Ok(HeaderCheck::NeedMore(HEADER_LEN - prefix.len())),
        Err(e @ HeaderError::BadMagic { .. }) => {
            error!("Invalid firmware: {}", e);
            Err(OtaError::InvalidFormat(e))
        }
    }
}
