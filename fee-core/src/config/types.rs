//! Configuration type definitions
//!
//! These types describe the static block and cluster tables of one Fee
//! instance. They are plain data; host tooling may produce them from a
//! TOML description (see the `fee-config` crate).

use fee_layout::Layout;
use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum configured blocks
pub const MAX_BLOCKS: usize = 64;

/// Maximum blocks adopted from flash without a configuration entry
pub const MAX_FOREIGN_BLOCKS: usize = 16;

/// Maximum entries in the runtime block table
pub const MAX_RUNTIME_BLOCKS: usize = MAX_BLOCKS + MAX_FOREIGN_BLOCKS;

/// Maximum cluster groups
pub const MAX_CLUSTER_GROUPS: usize = 4;

/// Maximum clusters in one group
pub const MAX_CLUSTERS_PER_GROUP: usize = 4;

/// Largest block payload in bytes
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Size of the buffer staging every flash write and compaction copy
pub const SCRATCH_SIZE: usize = 256;

/// Default chunk size for payload transfers
pub const DEFAULT_COPY_CHUNK_SIZE: u16 = 64;

/// One logical block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockConfig {
    /// Block number, unique across the instance
    pub number: u16,
    /// Payload size in bytes
    pub size: u16,
    /// Index of the owning cluster group
    #[cfg_attr(feature = "serde", serde(rename = "group"))]
    pub cluster_group: u8,
    /// Block may be written without a preceding allocation
    #[cfg_attr(feature = "serde", serde(default))]
    pub immediate: bool,
    /// Owning project tag (stored when the layout carries a project byte)
    #[cfg_attr(feature = "serde", serde(default))]
    pub project: u8,
}

impl BlockConfig {
    /// Create a plain block in group 0
    pub const fn new(number: u16, size: u16) -> Self {
        Self {
            number,
            size,
            cluster_group: 0,
            immediate: false,
            project: 0,
        }
    }

    /// Same block in another cluster group
    pub const fn in_group(mut self, group: u8) -> Self {
        self.cluster_group = group;
        self
    }

    /// Same block marked as immediate-data block
    pub const fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// One cluster (flash range)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterConfig {
    /// First address of the cluster
    pub start: u32,
    /// Length in bytes
    pub length: u32,
}

impl ClusterConfig {
    /// Address one past the cluster end
    pub const fn end(&self) -> u32 {
        self.start + self.length
    }
}

/// Clusters used alternately by a set of blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterGroupConfig {
    /// Clusters in swap order
    pub clusters: Vec<ClusterConfig, MAX_CLUSTERS_PER_GROUP>,
    /// Bytes of free space kept back for immediate-data blocks
    #[cfg_attr(feature = "serde", serde(default))]
    pub reserved: u32,
}

/// Optional engine features
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Features {
    /// Capacity of the foreign block table (0 = unknown blocks are dropped)
    pub foreign_blocks: u8,
    /// Track immediate blocks living in the reserved area
    pub reserved_area: bool,
    /// Write immediate blocks like ordinary blocks
    pub legacy_mode: bool,
}

/// Complete static configuration of a Fee instance
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeeConfig {
    /// Blocks sorted by number
    #[cfg_attr(feature = "serde", serde(rename = "block", default))]
    pub blocks: Vec<BlockConfig, MAX_BLOCKS>,
    /// Cluster groups
    #[cfg_attr(feature = "serde", serde(rename = "group"))]
    pub groups: Vec<ClusterGroupConfig, MAX_CLUSTER_GROUPS>,
    /// Flash geometry
    #[cfg_attr(feature = "serde", serde(default))]
    pub layout: Layout,
    /// Optional features
    #[cfg_attr(feature = "serde", serde(default))]
    pub features: Features,
    /// Payload transfer chunk in bytes
    #[cfg_attr(feature = "serde", serde(default = "default_copy_chunk_size"))]
    pub copy_chunk_size: u16,
    /// Instance id used in fault reports
    #[cfg_attr(feature = "serde", serde(default))]
    pub instance: u8,
}

#[cfg(feature = "serde")]
fn default_copy_chunk_size() -> u16 {
    DEFAULT_COPY_CHUNK_SIZE
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            blocks: Vec::new(),
            groups: Vec::new(),
            layout: Layout::new(),
            features: Features::default(),
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
            instance: 0,
        }
    }
}

impl FeeConfig {
    /// Look up a configured block by number
    pub fn block_index(&self, number: u16) -> Option<usize> {
        self.blocks.binary_search_by_key(&number, |b| b.number).ok()
    }

    /// Blocks belonging to `group`
    pub fn blocks_in_group(&self, group: u8) -> impl Iterator<Item = &BlockConfig> + '_ {
        self.blocks.iter().filter(move |b| b.cluster_group == group)
    }

    /// Flash bytes a block occupies in a cluster (header region plus data)
    pub fn block_footprint(&self, block: &BlockConfig) -> u32 {
        self.layout.block_record_len() + self.layout.data_len(block.size)
    }

    /// Sort blocks by number
    pub fn sort_blocks(&mut self) {
        self.blocks.sort_unstable_by_key(|b| b.number);
    }
}
