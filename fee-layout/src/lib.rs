//! On-flash layout of the Fee block store
//!
//! This crate defines how cluster headers, block record headers and their
//! flag pages are laid out in flash, and how a raw byte region read back
//! from flash is classified after a power loss.
//!
//! # Cluster layout
//!
//! ```text
//! start                                                      start + length
//! ┌──────────┬───────┬───────┬────────┬────────┬─ ─ ─ ─┬──────┬──────┐
//! │ CLUSTER  │ VALID │ INVAL │ RECORD │ RECORD │  free  │ DATA │ DATA │
//! │ HEADER   │ page  │ page  │ 0      │ 1 ...  │        │ 1    │ 0    │
//! └──────────┴───────┴───────┴────────┴────────┴─ ─ ─ ─┴──────┴──────┘
//!                             headers grow up ──▶   ◀── payloads grow down
//! ```
//!
//! # Record header
//!
//! ```text
//! ┌────────┬────────┬──────────────┬──────────┬─────────┬─────────┬───────┬───────┐
//! │ NUMBER │ LENGTH │ DATA ADDRESS │ CHECKSUM │ PROJECT │ padding │ VALID │ INVAL │
//! │ 2B LE  │ 2B LE  │ 4B LE        │ 4B LE    │ 0/1B    │ erase   │ page  │ page  │
//! └────────┴────────┴──────────────┴──────────┴─────────┴─────────┴───────┴───────┘
//! ```
//!
//! Flash bits only move from the erased state to the programmed state
//! without a full erase, so an interrupted write always leaves a suffix of
//! erased bytes behind. The checksum and the erased-padding rule turn such a
//! suffix into [`Decoded::HeaderInvalid`] instead of a plausible record.

#![no_std]
#![deny(unsafe_code)]

pub mod block;
pub mod checksum;
pub mod cluster;
pub mod flags;
pub mod geometry;

pub use block::BlockHeader;
pub use checksum::{block_checksum, cluster_checksum, IMMEDIATE_FLAG};
pub use cluster::ClusterHeader;
pub use flags::{combine_flags, FlagState, RecordState};
pub use geometry::{
    Layout, LayoutError, BLOCK_FIELDS_LEN, CLUSTER_FIELDS_LEN, DEFAULT_ERASE_VALUE,
    DEFAULT_FLAG_PATTERN, MAX_RECORD_LEN, MAX_VIRTUAL_PAGE_SIZE,
};

/// Result of decoding a header region read back from flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decoded<H> {
    /// The whole region is erased (end of the record list)
    Blank,
    /// Checksum mismatch or dirty padding (interrupted header write)
    HeaderInvalid,
    /// A header with a verified checksum
    Record {
        /// Decoded header fields
        header: H,
        /// State derived from the two flag pages
        state: RecordState,
        /// At least one flag page is neither set nor erased
        garbled: bool,
    },
}

impl<H> Decoded<H> {
    /// Check if this is the end-of-list sentinel
    pub fn is_blank(&self) -> bool {
        matches!(self, Decoded::Blank)
    }

    /// Get the header if the checksum verified
    pub fn header(&self) -> Option<&H> {
        match self {
            Decoded::Record { header, .. } => Some(header),
            _ => None,
        }
    }
}

/// Check if every byte of `bytes` equals the erase value
pub(crate) fn is_erased(bytes: &[u8], erase_value: u8) -> bool {
    bytes.iter().all(|&b| b == erase_value)
}

pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
