//! Reserved-area bookkeeping
//!
//! One bit per block table index, set for immediate blocks whose record was
//! allocated inside the reserved tail of the free space.

use crate::config::MAX_RUNTIME_BLOCKS;

const WORDS: usize = MAX_RUNTIME_BLOCKS.div_ceil(32);

/// Bitmap of blocks occupying the reserved area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReservedMap {
    bits: [u32; WORDS],
}

impl ReservedMap {
    /// Create an empty map
    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Mark block `index`
    pub fn set(&mut self, index: usize) {
        if index < MAX_RUNTIME_BLOCKS {
            self.bits[index / 32] |= 1 << (index % 32);
        }
    }

    /// Unmark block `index`
    pub fn clear(&mut self, index: usize) {
        if index < MAX_RUNTIME_BLOCKS {
            self.bits[index / 32] &= !(1 << (index % 32));
        }
    }

    /// Check block `index`
    pub fn contains(&self, index: usize) -> bool {
        index < MAX_RUNTIME_BLOCKS && self.bits[index / 32] & (1 << (index % 32)) != 0
    }

    /// Unmark every block
    pub fn clear_all(&mut self) {
        self.bits = [0; WORDS];
    }

    /// Number of marked blocks among `indices`
    pub fn count(&self, indices: impl Iterator<Item = usize>) -> usize {
        indices.filter(|&i| self.contains(i)).count()
    }
}
