//! Partition selection for dual-bank updates

use core::fmt;

use serde::Serialize;

use crate::error::{FlashError, OtaError};

/// Partition labels are at most 16 bytes in the partition table.
pub const LABEL_LEN: usize = 16;

pub type PartitionLabel = heapless::String<LABEL_LEN>;

/// Build a label, truncating at a character boundary past [`LABEL_LEN`] bytes.
pub fn label(name: &str) -> PartitionLabel {
    let mut out = PartitionLabel::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// One entry of the read-only partition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionDescriptor {
    pub label: PartitionLabel,
    pub base_offset: u32,
    pub capacity: usize,
}

impl PartitionDescriptor {
    pub fn new(name: &str, base_offset: u32, capacity: usize) -> Self {
        Self { label: label(name), base_offset, capacity }
    }

    pub fn fits(&self, size: usize) -> bool {
        size <= self.capacity
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (offset 0x{:x}, size 0x{:x})",
            self.label, self.base_offset, self.capacity
        )
    }
}

/// Read access to the partition table plus the boot pointer.
pub trait PartitionTable {
    /// The partition not marked as the active boot image.
    ///
    /// Must be side-effect-free and return the same partition for the
    /// duration of a session.
    fn select_target(&self) -> Result<PartitionDescriptor, OtaError>;

    /// Label of the partition the device is executing from.
    fn running_label(&self) -> Option<PartitionLabel>;

    /// Label of the partition the device will boot next.
    fn boot_label(&self) -> Option<PartitionLabel>;

    /// Atomically repoint the boot target.
    fn set_boot(&mut self, target: &PartitionDescriptor) -> Result<(), FlashError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_labels_are_truncated() {
        let l = label("a-very-long-partition-label");
        assert_eq!(l.len(), LABEL_LEN);
        assert_eq!(l.as_str(), "a-very-long-part");
    }

    #[test]
    fn display_shows_offset_and_size() {
        let p = PartitionDescriptor::new("ota_1", 0x1d_0000, 0x1c_0000);
        assert_eq!(p.to_string(), "ota_1 (offset 0x1d0000, size 0x1c0000)");
        assert!(p.fits(0x1c_0000));
        assert!(!p.fits(0x1c_0001));
    }
}
