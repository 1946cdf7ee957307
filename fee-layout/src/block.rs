//! Block record header encoding and decoding

use crate::checksum::{block_checksum, IMMEDIATE_FLAG};
use crate::flags::{combine_flags, decode_flag, encode_flag, FlagState};
use crate::geometry::{Layout, LayoutError, BLOCK_FIELDS_LEN};
use crate::{is_erased, read_u16, read_u32, Decoded};

/// Header of one record of a logical block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockHeader {
    /// Logical block number
    pub number: u16,
    /// Payload length in bytes
    pub length: u16,
    /// Absolute flash address of the payload
    pub data_address: u32,
    /// Block may be written into pre-reserved space
    pub immediate: bool,
    /// Owning project tag (stored only if the layout has a project byte)
    pub project: u8,
}

impl BlockHeader {
    /// Stored checksum for this header
    pub fn checksum(&self) -> u32 {
        block_checksum(self.number, self.length, self.data_address, self.immediate)
    }

    /// Encode header fields and padding (no flag pages) into `out`
    ///
    /// Returns the number of bytes written, which is always
    /// [`Layout::block_header_len`].
    pub fn encode(&self, layout: &Layout, out: &mut [u8]) -> Result<usize, LayoutError> {
        let len = layout.block_header_len() as usize;
        if out.len() < len {
            return Err(LayoutError::BufferTooSmall);
        }

        out[..len].fill(layout.erase_value);
        out[0..2].copy_from_slice(&self.number.to_le_bytes());
        out[2..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.data_address.to_le_bytes());
        out[8..12].copy_from_slice(&self.checksum().to_le_bytes());
        if layout.project_byte {
            out[BLOCK_FIELDS_LEN] = self.project;
        }

        Ok(len)
    }

    /// Encode the complete header region including both flag pages
    pub fn encode_record(
        &self,
        layout: &Layout,
        valid: bool,
        invalid: bool,
        out: &mut [u8],
    ) -> Result<usize, LayoutError> {
        let len = layout.block_record_len() as usize;
        if out.len() < len {
            return Err(LayoutError::BufferTooSmall);
        }
        self.encode(layout, out)?;
        encode_flag(layout, valid, &mut out[layout.block_valid_offset() as usize..])?;
        encode_flag(layout, invalid, &mut out[layout.block_invalid_offset() as usize..])?;
        Ok(len)
    }

    /// Decode a header region of [`Layout::block_record_len`] bytes
    pub fn decode(layout: &Layout, region: &[u8]) -> Result<Decoded<Self>, LayoutError> {
        let record_len = layout.block_record_len() as usize;
        if region.len() < record_len {
            return Err(LayoutError::BufferTooSmall);
        }
        let region = &region[..record_len];

        if is_erased(region, layout.erase_value) {
            return Ok(Decoded::Blank);
        }

        let fields_len = layout.block_fields_len();
        let header_len = layout.block_header_len() as usize;
        if !is_erased(&region[fields_len..header_len], layout.erase_value) {
            return Ok(Decoded::HeaderInvalid);
        }

        let stored = read_u32(region, 8);
        let header = BlockHeader {
            number: read_u16(region, 0),
            length: read_u16(region, 2),
            data_address: read_u32(region, 4),
            immediate: stored & IMMEDIATE_FLAG != 0,
            project: if layout.project_byte {
                region[BLOCK_FIELDS_LEN]
            } else {
                layout.erase_value
            },
        };

        if header.checksum() != stored {
            return Ok(Decoded::HeaderInvalid);
        }
        // The project byte is written last; an erased one means the write stopped short
        if layout.project_byte && header.project == layout.erase_value {
            return Ok(Decoded::HeaderInvalid);
        }

        let page = layout.page() as usize;
        let valid_at = layout.block_valid_offset() as usize;
        let invalid_at = layout.block_invalid_offset() as usize;
        let valid = decode_flag(layout, &region[valid_at..valid_at + page]);
        let invalid = decode_flag(layout, &region[invalid_at..invalid_at + page]);

        Ok(Decoded::Record {
            header,
            state: combine_flags(layout, valid, invalid),
            garbled: valid == FlagState::Garbled || invalid == FlagState::Garbled,
        })
    }
}
