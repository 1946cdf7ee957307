//! Flash geometry and derived region sizes

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Erase value of common NOR flash
pub const DEFAULT_ERASE_VALUE: u8 = 0xFF;

/// Marker byte programmed into the first byte of a set flag page
pub const DEFAULT_FLAG_PATTERN: u8 = 0x5A;

/// Default virtual page size in bytes
pub const DEFAULT_VIRTUAL_PAGE_SIZE: u16 = 8;

/// Largest supported virtual page size in bytes
pub const MAX_VIRTUAL_PAGE_SIZE: u16 = 32;

/// Number, length, data address and checksum
pub const BLOCK_FIELDS_LEN: usize = 2 + 2 + 4 + 4;

/// Generation id, start, length and checksum
pub const CLUSTER_FIELDS_LEN: usize = 4 + 4 + 4 + 4;

/// Largest header region (header fields, padding and both flag pages)
/// for any supported geometry
pub const MAX_RECORD_LEN: usize = 3 * MAX_VIRTUAL_PAGE_SIZE as usize;

/// Errors in a layout description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutError {
    /// Virtual page size is zero, not a power of two, or too large
    InvalidPageSize,
    /// Flag pattern is indistinguishable from erased flash
    InvalidFlagPattern,
    /// Output or input buffer shorter than the region
    BufferTooSmall,
}

/// Flash geometry shared by every cluster of a Fee instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Layout {
    /// Smallest programmable unit; each flag page occupies exactly one
    pub virtual_page_size: u16,
    /// Value of an erased byte
    pub erase_value: u8,
    /// First byte of a set flag page
    pub flag_pattern: u8,
    /// Append the owning project tag to every record header
    pub project_byte: bool,
    /// Report invalidated records as `Invalidated` instead of `Invalid`
    pub invalidated_status: bool,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

impl Layout {
    /// Create the default layout (8-byte pages, 0xFF erase value)
    pub const fn new() -> Self {
        Self {
            virtual_page_size: DEFAULT_VIRTUAL_PAGE_SIZE,
            erase_value: DEFAULT_ERASE_VALUE,
            flag_pattern: DEFAULT_FLAG_PATTERN,
            project_byte: false,
            invalidated_status: false,
        }
    }

    /// Check the layout for internal consistency
    pub fn validate(&self) -> Result<(), LayoutError> {
        let vps = self.virtual_page_size;
        if vps == 0 || !vps.is_power_of_two() || vps > MAX_VIRTUAL_PAGE_SIZE {
            return Err(LayoutError::InvalidPageSize);
        }
        if self.flag_pattern == self.erase_value {
            return Err(LayoutError::InvalidFlagPattern);
        }
        Ok(())
    }

    /// Virtual page size as a byte count
    pub const fn page(&self) -> u32 {
        self.virtual_page_size as u32
    }

    /// Round `len` up to a whole number of virtual pages
    pub const fn align_up(&self, len: u32) -> u32 {
        let page = self.page();
        (len + page - 1) / page * page
    }

    /// Round `address` down to a virtual page boundary
    pub const fn align_down(&self, address: u32) -> u32 {
        address - address % self.page()
    }

    /// Number of meaningful bytes in a block header
    pub const fn block_fields_len(&self) -> usize {
        if self.project_byte {
            BLOCK_FIELDS_LEN + 1
        } else {
            BLOCK_FIELDS_LEN
        }
    }

    /// Block header fields plus padding, excluding the flag pages
    pub const fn block_header_len(&self) -> u32 {
        self.align_up(self.block_fields_len() as u32)
    }

    /// Complete block header region including both flag pages
    pub const fn block_record_len(&self) -> u32 {
        self.block_header_len() + 2 * self.page()
    }

    /// Cluster header fields plus padding, excluding the flag pages
    pub const fn cluster_header_len(&self) -> u32 {
        self.align_up(CLUSTER_FIELDS_LEN as u32)
    }

    /// Complete cluster header region including both flag pages
    pub const fn cluster_record_len(&self) -> u32 {
        self.cluster_header_len() + 2 * self.page()
    }

    /// Bytes occupied in flash by a payload of `size` bytes
    pub const fn data_len(&self, size: u16) -> u32 {
        self.align_up(size as u32)
    }

    /// Offset of the validity page within a block header region
    pub const fn block_valid_offset(&self) -> u32 {
        self.block_header_len()
    }

    /// Offset of the invalidity page within a block header region
    pub const fn block_invalid_offset(&self) -> u32 {
        self.block_header_len() + self.page()
    }

    /// Offset of the validity page within a cluster header region
    pub const fn cluster_valid_offset(&self) -> u32 {
        self.cluster_header_len()
    }

    /// Offset of the invalidity page within a cluster header region
    pub const fn cluster_invalid_offset(&self) -> u32 {
        self.cluster_header_len() + self.page()
    }
}
