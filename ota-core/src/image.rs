//! ESP application image format: header parsing, whole-image verification
//! and a builder for well-formed images.
//!
//! Layout: a 24-byte header, `segment_count` segments of
//! `{load_addr: u32, data_len: u32, data}`, zero padding up to the byte before
//! a 16-byte boundary, one XOR checksum byte and, when the header's
//! `hash_appended` flag is set, a SHA-256 of everything before it.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// First byte of every application image.
pub const ESP_IMAGE_HEADER_MAGIC: u8 = 0xE9;
/// Fixed size of the image header.
pub const HEADER_LEN: usize = 24;
/// Size of a segment header (`load_addr` + `data_len`).
pub const SEGMENT_HEADER_LEN: usize = 8;
/// Upper bound the bootloader accepts for `segment_count`.
pub const MAX_SEGMENTS: u8 = 16;
/// Seed of the segment-data XOR checksum.
pub const CHECKSUM_SEED: u8 = 0xEF;
/// Length of the appended SHA-256 digest.
pub const HASH_LEN: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header needs {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("bad magic 0x{found:02x} (expected 0x{:02x})", ESP_IMAGE_HEADER_MAGIC)]
    BadMagic { found: u8 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("segment count {0} out of range")]
    BadSegmentCount(u8),

    #[error("image truncated at offset {offset} (length {len})")]
    Truncated { offset: usize, len: usize },

    #[error("checksum mismatch: computed 0x{computed:02x}, stored 0x{stored:02x}")]
    ChecksumMismatch { computed: u8, stored: u8 },

    #[error("appended SHA-256 does not match image contents")]
    HashMismatch,

    #[error("image ends at {image_len} bytes but {written} were written")]
    SizeMismatch { image_len: usize, written: usize },
}

/// The fixed header at the start of an application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareHeader {
    pub magic: u8,
    pub segment_count: u8,
    pub spi_mode: u8,
    pub spi_speed_size: u8,
    pub entry_addr: u32,
    pub wp_pin: u8,
    pub spi_pin_drv: [u8; 3],
    pub chip_id: u16,
    pub min_chip_rev: u8,
    pub min_chip_rev_full: u16,
    pub max_chip_rev_full: u16,
    pub hash_appended: bool,
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

impl FirmwareHeader {
    /// Parse the header from the start of `buf`.
    ///
    /// Fails with [`HeaderError::Truncated`] rather than reading past a short
    /// buffer; callers holding a partial first chunk should receive more and
    /// retry.
    pub fn parse(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_LEN {
            return Err(HeaderError::Truncated { needed: HEADER_LEN, got: buf.len() });
        }
        if buf[0] != ESP_IMAGE_HEADER_MAGIC {
            return Err(HeaderError::BadMagic { found: buf[0] });
        }
        Ok(Self {
            magic: buf[0],
            segment_count: buf[1],
            spi_mode: buf[2],
            spi_speed_size: buf[3],
            entry_addr: le_u32(buf, 4),
            wp_pin: buf[8],
            spi_pin_drv: [buf[9], buf[10], buf[11]],
            chip_id: le_u16(buf, 12),
            min_chip_rev: buf[14],
            min_chip_rev_full: le_u16(buf, 15),
            max_chip_rev_full: le_u16(buf, 17),
            // 19..23 reserved
            hash_appended: buf[23] == 1,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.magic;
        out[1] = self.segment_count;
        out[2] = self.spi_mode;
        out[3] = self.spi_speed_size;
        out[4..8].copy_from_slice(&self.entry_addr.to_le_bytes());
        out[8] = self.wp_pin;
        out[9..12].copy_from_slice(&self.spi_pin_drv);
        out[12..14].copy_from_slice(&self.chip_id.to_le_bytes());
        out[14] = self.min_chip_rev;
        out[15..17].copy_from_slice(&self.min_chip_rev_full.to_le_bytes());
        out[17..19].copy_from_slice(&self.max_chip_rev_full.to_le_bytes());
        out[23] = u8::from(self.hash_appended);
        out
    }
}

impl Default for FirmwareHeader {
    fn default() -> Self {
        Self {
            magic: ESP_IMAGE_HEADER_MAGIC,
            segment_count: 0,
            spi_mode: 2,         // DIO
            spi_speed_size: 0x2f, // 4MB, 80MHz
            entry_addr: 0x4037_5a5c,
            wp_pin: 0xee,
            spi_pin_drv: [0; 3],
            chip_id: 9, // ESP32-S3
            min_chip_rev: 0,
            min_chip_rev_full: 0,
            max_chip_rev_full: 99,
            hash_appended: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub load_addr: u32,
    pub offset: usize,
    pub len: usize,
}

/// Result of a successful [`verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub header: FirmwareHeader,
    pub segments: Vec<SegmentInfo>,
    pub checksum: u8,
    pub image_len: usize,
    pub sha256: Option<[u8; HASH_LEN]>,
}

/// Position of the checksum byte for segment data ending at `end`.
fn checksum_pos(end: usize) -> usize {
    end + (15 - end % 16)
}

/// Verify a complete image: segment walk, checksum, optional appended hash,
/// and that the image structure accounts for exactly `image.len()` bytes.
pub fn verify(image: &[u8]) -> Result<ImageSummary, ImageError> {
    let header = FirmwareHeader::parse(image)?;
    if header.segment_count == 0 || header.segment_count > MAX_SEGMENTS {
        return Err(ImageError::BadSegmentCount(header.segment_count));
    }

    let len = image.len();
    let mut offset = HEADER_LEN;
    let mut checksum = CHECKSUM_SEED;
    let mut segments = Vec::with_capacity(header.segment_count as usize);

    for _ in 0..header.segment_count {
        if offset + SEGMENT_HEADER_LEN > len {
            return Err(ImageError::Truncated { offset, len });
        }
        let load_addr = le_u32(image, offset);
        let data_len = le_u32(image, offset + 4) as usize;
        offset += SEGMENT_HEADER_LEN;

        let Some(data) = image.get(offset..offset.saturating_add(data_len)) else {
            return Err(ImageError::Truncated { offset, len });
        };
        checksum = data.iter().fold(checksum, |acc, b| acc ^ b);
        segments.push(SegmentInfo { load_addr, offset, len: data_len });
        offset += data_len;
    }

    let pos = checksum_pos(offset);
    let Some(&stored) = image.get(pos) else {
        return Err(ImageError::Truncated { offset: pos, len });
    };
    if stored != checksum {
        return Err(ImageError::ChecksumMismatch { computed: checksum, stored });
    }
    let mut end = pos + 1;

    let mut sha256 = None;
    if header.hash_appended {
        let Some(appended) = image.get(end..end + HASH_LEN) else {
            return Err(ImageError::Truncated { offset: end, len });
        };
        let digest: [u8; HASH_LEN] = Sha256::digest(&image[..end]).into();
        if digest.as_slice() != appended {
            return Err(ImageError::HashMismatch);
        }
        sha256 = Some(digest);
        end += HASH_LEN;
    }

    if end != len {
        return Err(ImageError::SizeMismatch { image_len: end, written: len });
    }

    Ok(ImageSummary { header, segments, checksum, image_len: end, sha256 })
}

/// Produces well-formed application images.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    header: FirmwareHeader,
    segments: Vec<(u32, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_addr(mut self, addr: u32) -> Self {
        self.header.entry_addr = addr;
        self
    }

    pub fn hash_appended(mut self, on: bool) -> Self {
        self.header.hash_appended = on;
        self
    }

    pub fn segment(mut self, load_addr: u32, data: Vec<u8>) -> Self {
        self.segments.push((load_addr, data));
        self
    }

    /// Single-segment image of exactly `total_len` bytes.
    ///
    /// `total_len` must be a multiple of 16 and leave room for the header,
    /// one segment header, the checksum block and the hash when enabled.
    pub fn sized(total_len: usize, hash_appended: bool) -> Option<Vec<u8>> {
        let hash = if hash_appended { HASH_LEN } else { 0 };
        let overhead = HEADER_LEN + SEGMENT_HEADER_LEN + 16 + hash;
        if total_len % 16 != 0 || total_len < overhead {
            return None;
        }
        let data = (0..total_len - overhead)
            .map(|i| (i.wrapping_mul(31).wrapping_add(7)) as u8)
            .collect();
        Some(
            Self::new()
                .hash_appended(hash_appended)
                .segment(0x3c00_0020, data)
                .build(),
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = self.header;
        header.segment_count = self.segments.len() as u8;

        let mut out = header.to_bytes().to_vec();
        let mut checksum = CHECKSUM_SEED;
        for (load_addr, data) in &self.segments {
            out.extend_from_slice(&load_addr.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
            checksum = data.iter().fold(checksum, |acc, b| acc ^ b);
        }
        out.resize(checksum_pos(out.len()), 0);
        out.push(checksum);

        if header.hash_appended {
            let digest = Sha256::digest(&out);
            out.extend_from_slice(&digest);
        }
        out
    }
}
