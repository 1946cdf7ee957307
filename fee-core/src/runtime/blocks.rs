//! Block descriptors and their resolved state

use heapless::Vec;

use crate::config::{BlockConfig, FeeConfig, MAX_RUNTIME_BLOCKS};
use crate::state::BlockStatus;

/// Resolved location and status of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockRuntimeInfo {
    /// Status of the latest record
    pub status: BlockStatus,
    /// Start of the latest header region in the active cluster
    pub header_address: Option<u32>,
    /// Start of the payload of the latest record
    pub data_address: u32,
    /// Immediate block with header and erased payload space already written
    pub prepared: bool,
}

/// Descriptors and runtime state of every known block
#[derive(Debug, Clone)]
pub struct BlockTable {
    /// Configured blocks sorted by number, followed by adopted foreign blocks
    descriptors: Vec<BlockConfig, MAX_RUNTIME_BLOCKS>,
    configured: usize,
    foreign_capacity: usize,
    infos: Vec<BlockRuntimeInfo, MAX_RUNTIME_BLOCKS>,
}

impl BlockTable {
    /// Build the table for a validated configuration
    pub fn new(config: &FeeConfig) -> Self {
        let mut descriptors = Vec::new();
        let mut infos = Vec::new();
        for block in config.blocks.iter() {
            // MAX_BLOCKS fits MAX_RUNTIME_BLOCKS
            let _ = descriptors.push(*block);
            let _ = infos.push(BlockRuntimeInfo::default());
        }
        Self {
            configured: descriptors.len(),
            descriptors,
            foreign_capacity: config.features.foreign_blocks as usize,
            infos,
        }
    }

    /// Forget foreign blocks and every resolved state
    pub fn reset(&mut self) {
        self.descriptors.truncate(self.configured);
        self.infos.truncate(self.configured);
        for info in self.infos.iter_mut() {
            *info = BlockRuntimeInfo::default();
        }
    }

    /// Number of known blocks
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if no block is known
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Number of adopted foreign blocks
    pub fn foreign_count(&self) -> usize {
        self.descriptors.len() - self.configured
    }

    /// Check if the entry at `index` was adopted from flash
    pub fn is_foreign(&self, index: usize) -> bool {
        index >= self.configured
    }

    /// Find the table index of block `number`
    pub fn find(&self, number: u16) -> Option<usize> {
        if let Ok(index) = self.descriptors[..self.configured].binary_search_by_key(&number, |b| b.number) {
            return Some(index);
        }
        self.descriptors[self.configured..]
            .iter()
            .position(|b| b.number == number)
            .map(|i| i + self.configured)
    }

    /// Adopt a block found on flash; `None` when the foreign table is full
    pub fn adopt(&mut self, block: BlockConfig) -> Option<usize> {
        if self.foreign_count() >= self.foreign_capacity {
            return None;
        }
        self.descriptors.push(block).ok()?;
        if self.infos.push(BlockRuntimeInfo::default()).is_err() {
            self.descriptors.pop();
            return None;
        }
        Some(self.descriptors.len() - 1)
    }

    /// Descriptor of the block at `index`
    pub fn descriptor(&self, index: usize) -> &BlockConfig {
        &self.descriptors[index]
    }

    /// Runtime state of the block at `index`
    pub fn info(&self, index: usize) -> &BlockRuntimeInfo {
        &self.infos[index]
    }

    /// Mutable runtime state of the block at `index`
    pub fn info_mut(&mut self, index: usize) -> &mut BlockRuntimeInfo {
        &mut self.infos[index]
    }

    /// Indices of the blocks stored in `group`, ascending
    pub fn in_group(&self, group: u8) -> impl Iterator<Item = usize> + '_ {
        self.descriptors
            .iter()
            .enumerate()
            .filter(move |(_, b)| b.cluster_group == group)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(foreign: u8) -> BlockTable {
        let mut cfg = FeeConfig::default();
        for n in [2u16, 4, 9, 30] {
            cfg.blocks.push(BlockConfig::new(n, 8)).unwrap();
        }
        cfg.features.foreign_blocks = foreign;
        BlockTable::new(&cfg)
    }

    #[test]
    fn test_find_configured() {
        let t = table(0);
        assert_eq!(t.find(9), Some(2));
        assert_eq!(t.find(3), None);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_adopt_until_full() {
        let mut t = table(2);
        assert_eq!(t.adopt(BlockConfig::new(100, 4)), Some(4));
        assert_eq!(t.adopt(BlockConfig::new(50, 4)), Some(5));
        assert_eq!(t.adopt(BlockConfig::new(60, 4)), None);
        assert_eq!(t.find(50), Some(5));
        assert!(t.is_foreign(5));
        assert!(!t.is_foreign(3));

        t.reset();
        assert_eq!(t.find(50), None);
        assert_eq!(t.foreign_count(), 0);
    }

    #[test]
    fn test_adoption_disabled() {
        let mut t = table(0);
        assert_eq!(t.adopt(BlockConfig::new(100, 4)), None);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut t = table(0);
        t.info_mut(1).status = BlockStatus::Valid;
        t.info_mut(1).header_address = Some(0x40);
        t.reset();
        assert_eq!(*t.info(1), BlockRuntimeInfo::default());
    }
}
