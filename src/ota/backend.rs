// Partition table and flash writer backed by the ESP-IDF OTA API

use core::ffi::c_void;
use std::ffi::{CStr, CString};

use esp_idf_sys::{
    esp_err_t, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_boot_partition,
    esp_ota_get_next_update_partition, esp_ota_get_running_partition, esp_ota_handle_t,
    esp_ota_set_boot_partition, esp_ota_write, esp_partition_find_first,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY, esp_partition_t,
    esp_partition_type_t_ESP_PARTITION_TYPE_APP, EspError, ESP_ERR_OTA_VALIDATE_FAILED,
    OTA_WITH_SEQUENTIAL_WRITES,
};
use ota_core::{
    FinishError, FlashError, FlashWriter, OtaError, PartitionDescriptor, PartitionLabel,
    PartitionTable,
};

/// Stateless view over the app partitions; safe to create per request.
#[derive(Debug, Default)]
pub struct EspOtaBackend;

/// An open `esp_ota_*` handle.
#[derive(Debug)]
pub struct EspOtaHandle(esp_ota_handle_t);

impl EspOtaBackend {
    pub fn new() -> Self {
        Self
    }

    /// Label of the partition the next update would go to.
    pub fn update_label(&self) -> Option<PartitionLabel> {
        self.select_target().ok().map(|p| p.label)
    }
}

fn driver_error(code: esp_err_t) -> FlashError {
    let name = EspError::from(code)
        .map(|e| e.to_string())
        .unwrap_or_else(|| "ESP_OK".to_string());
    FlashError::Driver { code, name }
}

fn check(code: esp_err_t) -> Result<(), FlashError> {
    match EspError::from(code) {
        None => Ok(()),
        Some(_) => Err(driver_error(code)),
    }
}

fn describe(part: *const esp_partition_t) -> Option<PartitionDescriptor> {
    if part.is_null() {
        return None;
    }
    // The partition table is static for the lifetime of the app.
    let part = unsafe { &*part };
    let name = unsafe { CStr::from_ptr(part.label.as_ptr()) }.to_string_lossy();
    Some(PartitionDescriptor::new(&name, part.address, part.size as usize))
}

/// Re-resolve a descriptor to the driver's partition record.
fn lookup(target: &PartitionDescriptor) -> Result<*const esp_partition_t, FlashError> {
    let name = CString::new(target.label.as_str())
        .map_err(|_| FlashError::Other(format!("bad partition label {}", target.label)))?;
    let part = unsafe {
        esp_partition_find_first(
            esp_partition_type_t_ESP_PARTITION_TYPE_APP,
            esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
            name.as_ptr(),
        )
    };
    match describe(part) {
        Some(found) if found == *target => Ok(part),
        Some(found) => Err(FlashError::Other(format!("partition changed: {}", found))),
        None => Err(FlashError::Other(format!("partition {} not found", target.label))),
    }
}

impl PartitionTable for EspOtaBackend {
    fn select_target(&self) -> Result<PartitionDescriptor, OtaError> {
        let part = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        describe(part).ok_or(OtaError::NoPartitionAvailable)
    }

    fn running_label(&self) -> Option<PartitionLabel> {
        describe(unsafe { esp_ota_get_running_partition() }).map(|p| p.label)
    }

    fn boot_label(&self) -> Option<PartitionLabel> {
        describe(unsafe { esp_ota_get_boot_partition() }).map(|p| p.label)
    }

    fn set_boot(&mut self, target: &PartitionDescriptor) -> Result<(), FlashError> {
        let part = lookup(target)?;
        check(unsafe { esp_ota_set_boot_partition(part) })
    }
}

impl FlashWriter for EspOtaBackend {
    type Handle = EspOtaHandle;

    fn begin(&mut self, target: &PartitionDescriptor) -> Result<EspOtaHandle, FlashError> {
        let part = lookup(target)?;
        let mut handle: esp_ota_handle_t = 0;
        // Sequential writes erase sector by sector instead of up front
        check(unsafe {
            esp_ota_begin(part, OTA_WITH_SEQUENTIAL_WRITES as usize, &mut handle as *mut _)
        })?;
        log::debug!("esp_ota_begin ok on {}", target.label);
        Ok(EspOtaHandle(handle))
    }

    fn write(&mut self, handle: &mut EspOtaHandle, chunk: &[u8]) -> Result<(), FlashError> {
        check(unsafe { esp_ota_write(handle.0, chunk.as_ptr() as *const c_void, chunk.len()) })
    }

    fn finish(&mut self, handle: EspOtaHandle) -> Result<(), FinishError> {
        // esp_ota_end releases the handle on every outcome
        let result = unsafe { esp_ota_end(handle.0) };
        if result == ESP_ERR_OTA_VALIDATE_FAILED as esp_err_t {
            return Err(FinishError::Validation(driver_error(result).to_string()));
        }
        check(result).map_err(FinishError::Flash)
    }

    fn abort(&mut self, handle: EspOtaHandle) {
        if let Err(e) = check(unsafe { esp_ota_abort(handle.0) }) {
            log::warn!("esp_ota_abort failed: {}", e);
        }
    }
}
