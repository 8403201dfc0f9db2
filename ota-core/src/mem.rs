//! In-memory dual-bank flash with fault injection
//!
//! Implements [`PartitionTable`] and [`FlashWriter`] over plain byte vectors.
//! `finish` runs the same whole-image checks the bootloader applies, so it
//! stands in for real flash in host tests and simulations.

use log::debug;

use crate::error::{FinishError, FlashError, OtaError};
use crate::image;
use crate::partition::{PartitionDescriptor, PartitionLabel, PartitionTable};
use crate::writer::FlashWriter;

/// Offset of the first application partition in the default layout.
pub const APP_BASE: u32 = 0x1_0000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashStats {
    pub begins: usize,
    pub writes: usize,
    pub bytes_written: usize,
    pub finishes: usize,
    pub aborts: usize,
    pub boot_switches: usize,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    begin: bool,
    /// 1-based index of the write call (within one handle) that fails.
    write_call: Option<usize>,
    finish: Option<String>,
    set_boot: bool,
}

#[derive(Debug)]
struct Bank {
    desc: PartitionDescriptor,
    data: Vec<u8>,
    valid: bool,
}

/// Handle returned by [`InMemoryFlash::begin`].
#[derive(Debug)]
pub struct MemHandle {
    bank: usize,
    writes: usize,
}

#[derive(Debug)]
pub struct InMemoryFlash {
    banks: Vec<Bank>,
    running: usize,
    boot: usize,
    open: usize,
    check_images: bool,
    faults: Faults,
    stats: FlashStats,
}

impl InMemoryFlash {
    /// Two application partitions of `capacity` bytes, booted from `ota_0`.
    pub fn dual_bank(capacity: usize) -> Self {
        Self::with_partitions(
            vec![
                PartitionDescriptor::new("ota_0", APP_BASE, capacity),
                PartitionDescriptor::new("ota_1", APP_BASE + capacity as u32, capacity),
            ],
            0,
        )
    }

    /// A factory-only layout with nothing to update into.
    pub fn single_bank(capacity: usize) -> Self {
        Self::with_partitions(vec![PartitionDescriptor::new("factory", APP_BASE, capacity)], 0)
    }

    pub fn with_partitions(partitions: Vec<PartitionDescriptor>, boot: usize) -> Self {
        let banks = partitions
            .into_iter()
            .map(|desc| Bank { desc, data: Vec::new(), valid: false })
            .collect();
        Self {
            banks,
            running: boot,
            boot,
            open: 0,
            check_images: true,
            faults: Faults::default(),
            stats: FlashStats::default(),
        }
    }

    /// Skip whole-image validation in `finish`; only sizes are tracked.
    pub fn without_image_checks(mut self) -> Self {
        self.check_images = false;
        self
    }

    pub fn fail_begin(mut self) -> Self {
        self.faults.begin = true;
        self
    }

    /// Fail the `call`-th write (1-based) of every handle.
    pub fn fail_write_on_call(mut self, call: usize) -> Self {
        self.faults.write_call = Some(call);
        self
    }

    pub fn fail_finish(mut self, reason: &str) -> Self {
        self.faults.finish = Some(reason.to_string());
        self
    }

    pub fn fail_set_boot(mut self) -> Self {
        self.faults.set_boot = true;
        self
    }

    pub fn stats(&self) -> FlashStats {
        self.stats
    }

    pub fn open_handles(&self) -> usize {
        self.open
    }

    /// Contents written to the partition named `label`.
    pub fn contents(&self, label: &str) -> Option<&[u8]> {
        self.bank(label).map(|b| b.data.as_slice())
    }

    pub fn has_valid_image(&self, label: &str) -> bool {
        self.bank(label).is_some_and(|b| b.valid)
    }

    /// Simulate the restart into the boot partition.
    pub fn reboot(&mut self) {
        self.running = self.boot;
    }

    fn bank(&self, label: &str) -> Option<&Bank> {
        self.banks.iter().find(|b| b.desc.label.as_str() == label)
    }
}

impl PartitionTable for InMemoryFlash {
    fn select_target(&self) -> Result<PartitionDescriptor, OtaError> {
        self.banks
            .iter()
            .enumerate()
            .find(|(i, _)| *i != self.boot)
            .map(|(_, b)| b.desc.clone())
            .ok_or(OtaError::NoPartitionAvailable)
    }

    fn running_label(&self) -> Option<PartitionLabel> {
        self.banks.get(self.running).map(|b| b.desc.label.clone())
    }

    fn boot_label(&self) -> Option<PartitionLabel> {
        self.banks.get(self.boot).map(|b| b.desc.label.clone())
    }

    fn set_boot(&mut self, target: &PartitionDescriptor) -> Result<(), FlashError> {
        if self.faults.set_boot {
            return Err(FlashError::Other("injected boot switch fault".into()));
        }
        let Some(idx) = self.banks.iter().position(|b| b.desc == *target) else {
            return Err(FlashError::Other(format!("unknown partition {}", target.label)));
        };
        if !self.banks[idx].valid {
            return Err(FlashError::Other(format!("{} holds no valid image", target.label)));
        }
        self.boot = idx;
        self.stats.boot_switches += 1;
        Ok(())
    }
}

impl FlashWriter for InMemoryFlash {
    type Handle = MemHandle;

    fn begin(&mut self, target: &PartitionDescriptor) -> Result<MemHandle, FlashError> {
        self.stats.begins += 1;
        if self.faults.begin {
            return Err(FlashError::Other("injected begin fault".into()));
        }
        if self.open > 0 {
            return Err(FlashError::Other("a write handle is already open".into()));
        }
        let Some(bank) = self.banks.iter().position(|b| b.desc == *target) else {
            return Err(FlashError::Other(format!("unknown partition {}", target.label)));
        };
        if bank == self.running {
            return Err(FlashError::Other("refusing to write the running partition".into()));
        }
        // Erase
        self.banks[bank].data.clear();
        self.banks[bank].valid = false;
        self.open += 1;
        debug!("mem flash: opened {}", target.label);
        Ok(MemHandle { bank, writes: 0 })
    }

    fn write(&mut self, handle: &mut MemHandle, chunk: &[u8]) -> Result<(), FlashError> {
        handle.writes += 1;
        self.stats.writes += 1;
        if self.faults.write_call == Some(handle.writes) {
            return Err(FlashError::Other(format!("injected fault on write {}", handle.writes)));
        }
        let bank = &mut self.banks[handle.bank];
        if bank.data.len() + chunk.len() > bank.desc.capacity {
            return Err(FlashError::Other("write past end of partition".into()));
        }
        bank.data.extend_from_slice(chunk);
        self.stats.bytes_written += chunk.len();
        Ok(())
    }

    fn finish(&mut self, handle: MemHandle) -> Result<(), FinishError> {
        self.open -= 1;
        self.stats.finishes += 1;
        if let Some(reason) = &self.faults.finish {
            return Err(FinishError::Flash(FlashError::Other(reason.clone())));
        }
        let bank = &mut self.banks[handle.bank];
        if self.check_images {
            image::verify(&bank.data).map_err(|e| FinishError::Validation(e.to_string()))?;
        } else if bank.data.is_empty() {
            return Err(FinishError::Validation("nothing written".into()));
        }
        bank.valid = true;
        Ok(())
    }

    fn abort(&mut self, handle: MemHandle) {
        self.open -= 1;
        self.stats.aborts += 1;
        self.banks[handle.bank].valid = false;
    }
}
