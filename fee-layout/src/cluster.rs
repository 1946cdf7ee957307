//! Cluster header encoding and decoding

use crate::checksum::cluster_checksum;
use crate::flags::{combine_flags, decode_flag, encode_flag, FlagState};
use crate::geometry::{Layout, LayoutError, CLUSTER_FIELDS_LEN};
use crate::{is_erased, read_u32, Decoded};

/// Header written once when a cluster is formatted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClusterHeader {
    /// Incremented on every swap into this cluster
    pub generation: u32,
    /// Absolute start address of the cluster
    pub start: u32,
    /// Cluster length in bytes
    pub length: u32,
}

impl ClusterHeader {
    /// Stored checksum for this header
    pub fn checksum(&self) -> u32 {
        cluster_checksum(self.generation, self.start, self.length)
    }

    /// Encode header fields and padding (no flag pages) into `out`
    pub fn encode(&self, layout: &Layout, out: &mut [u8]) -> Result<usize, LayoutError> {
        let len = layout.cluster_header_len() as usize;
        if out.len() < len {
            return Err(LayoutError::BufferTooSmall);
        }

        out[..len].fill(layout.erase_value);
        out[0..4].copy_from_slice(&self.generation.to_le_bytes());
        out[4..8].copy_from_slice(&self.start.to_le_bytes());
        out[8..12].copy_from_slice(&self.length.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum().to_le_bytes());

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
        let len = layout.cluster_record_len() as usize;
        if out.len() < len {
            return Err(LayoutError::BufferTooSmall);
        }
        self.encode(layout, out)?;
        encode_flag(layout, valid, &mut out[layout.cluster_valid_offset() as usize..])?;
        encode_flag(layout, invalid, &mut out[layout.cluster_invalid_offset() as usize..])?;
        Ok(len)
    }

    /// Decode a header region of [`Layout::cluster_record_len`] bytes
    pub fn decode(layout: &Layout, region: &[u8]) -> Result<Decoded<Self>, LayoutError> {
        let record_len = layout.cluster_record_len() as usize;
        if region.len() < record_len {
            return Err(LayoutError::BufferTooSmall);
        }
        let region = &region[..record_len];

        if is_erased(region, layout.erase_value) {
            return Ok(Decoded::Blank);
        }

        let header_len = layout.cluster_header_len() as usize;
        if !is_erased(&region[CLUSTER_FIELDS_LEN..header_len], layout.erase_value) {
            return Ok(Decoded::HeaderInvalid);
        }

        let header = ClusterHeader {
            generation: read_u32(region, 0),
            start: read_u32(region, 4),
            length: read_u32(region, 8),
        };
        if header.checksum() != read_u32(region, 12) {
            return Ok(Decoded::HeaderInvalid);
        }

        let page = layout.page() as usize;
        let valid_at = layout.cluster_valid_offset() as usize;
        let invalid_at = layout.cluster_invalid_offset() as usize;
        let valid = decode_flag(layout, &region[valid_at..valid_at + page]);
        let invalid = decode_flag(layout, &region[invalid_at..invalid_at + page]);

        Ok(Decoded::Record {
            header,
            state: combine_flags(layout, valid, invalid),
            garbled: valid == FlagState::Garbled || invalid == FlagState::Garbled,
        })
    }
}
