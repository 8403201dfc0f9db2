//! Whole-image validation and boot switch

use log::{error, info};

use crate::error::{FinishError, OtaError};
use crate::partition::{PartitionDescriptor, PartitionTable};
use crate::writer::{FlashWriter, StreamingWriter};

/// Close the write handle and validate the fully written image.
///
/// The handle is released on every outcome.
pub fn finish<W: FlashWriter>(writer: &mut StreamingWriter<'_, W>) -> Result<(), OtaError> {
    if writer.written() != writer.expected() {
        error!(
            "Image size mismatch: wrote {} of {} bytes",
            writer.written(),
            writer.expected()
        );
        // Dropping the writer aborts the handle.
        return Err(OtaError::ValidationFailed(format!(
            "wrote {} of {} bytes",
            writer.written(),
            writer.expected()
        )));
    }

    match writer.close() {
        Ok(()) => {
            info!("Firmware received: {} bytes", writer.written());
            Ok(())
        }
        Err(FinishError::Validation(reason)) => {
            error!("Firmware validation failed: {}", reason);
            Err(OtaError::ValidationFailed(reason))
        }
        Err(FinishError::Flash(e)) => {
            error!("OTA finalize failed: {}", e);
            Err(OtaError::FinalizeFailed(e.to_string()))
        }
    }
}

/// Repoint the boot target at `target`.
///
/// Only called after a successful [`finish`]. On failure the partition keeps a
/// validated image that will not boot.
pub fn commit<P: PartitionTable>(table: &mut P, target: &PartitionDescriptor) -> Result<(), OtaError> {
    table.set_boot(target).map_err(|e| {
        error!("Set boot partition {} failed: {}", target.label, e);
        OtaError::BootSwitchFailed(e)
    })?;
    info!("Boot partition set to {}", target.label);
    Ok(())
}
