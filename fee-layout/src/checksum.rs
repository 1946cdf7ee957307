//! Header checksums
//!
//! Checksums are plain wrapping sums of the numeric header fields. For
//! block headers the most significant bit carries the immediate-data flag,
//! so only the low 31 bits hold the sum. The flag also adds one to the sum,
//! which makes a flipped flag bit a checksum mismatch.

/// Immediate-data flag bit within a block checksum
pub const IMMEDIATE_FLAG: u32 = 0x8000_0000;

/// Checksum of a block header
pub fn block_checksum(number: u16, length: u16, data_address: u32, immediate: bool) -> u32 {
    let sum = (number as u32)
        .wrapping_add(length as u32)
        .wrapping_add(data_address)
        .wrapping_add(immediate as u32)
        & !IMMEDIATE_FLAG;

    if immediate {
        sum | IMMEDIATE_FLAG
    } else {
        sum
    }
}

/// Checksum of a cluster header
pub fn cluster_checksum(generation: u32, start: u32, length: u32) -> u32 {
    generation.wrapping_add(start).wrapping_add(length)
}
