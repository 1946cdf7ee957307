//! Static configuration checks

use fee_layout::LayoutError;

use super::types::{FeeConfig, MAX_BLOCK_SIZE, MAX_FOREIGN_BLOCKS, SCRATCH_SIZE};

/// Problems found in a static configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Flash geometry is invalid
    Layout(LayoutError),
    /// No cluster group configured
    NoClusterGroups,
    /// Group has fewer than two clusters
    TooFewClusters(u8),
    /// Cluster start or length not on a virtual page boundary
    ClusterMisaligned(u8),
    /// Cluster overlaps another cluster
    ClusterOverlap(u8),
    /// Cluster cannot hold every block of its group
    ClusterTooSmall(u8),
    /// Block numbers not in ascending order
    UnsortedBlocks(u16),
    /// Block number appears twice
    DuplicateBlock(u16),
    /// Block references a missing cluster group
    UnknownGroup(u16),
    /// Block has no payload
    ZeroSizeBlock(u16),
    /// Block larger than the payload buffer
    BlockTooLarge(u16),
    /// Project tag equals the erase value and would read back as blank
    ProjectIsErased(u16),
    /// Chunk size is zero, unaligned or larger than the scratch buffer
    InvalidChunkSize,
    /// Foreign block table larger than supported
    ForeignCapacity,
}

impl From<LayoutError> for ConfigError {
    fn from(err: LayoutError) -> Self {
        ConfigError::Layout(err)
    }
}

impl FeeConfig {
    /// Check every statically checkable invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        let layout = &self.layout;
        layout.validate()?;

        if self.groups.is_empty() {
            return Err(ConfigError::NoClusterGroups);
        }

        let chunk = self.copy_chunk_size as u32;
        if chunk == 0 || chunk as usize > SCRATCH_SIZE || chunk % layout.page() != 0 {
            return Err(ConfigError::InvalidChunkSize);
        }

        if self.features.foreign_blocks as usize > MAX_FOREIGN_BLOCKS {
            return Err(ConfigError::ForeignCapacity);
        }

        self.validate_blocks()?;
        self.validate_clusters()
    }

    fn validate_blocks(&self) -> Result<(), ConfigError> {
        let layout = &self.layout;
        let mut previous: Option<u16> = None;

        for block in self.blocks.iter() {
            match previous {
                Some(p) if p == block.number => return Err(ConfigError::DuplicateBlock(block.number)),
                Some(p) if p > block.number => return Err(ConfigError::UnsortedBlocks(block.number)),
                _ => {}
            }
            previous = Some(block.number);

            if block.cluster_group as usize >= self.groups.len() {
                return Err(ConfigError::UnknownGroup(block.number));
            }
            if block.size == 0 {
                return Err(ConfigError::ZeroSizeBlock(block.number));
            }
            if block.size as usize > MAX_BLOCK_SIZE {
                return Err(ConfigError::BlockTooLarge(block.number));
            }
            if layout.project_byte && block.project == layout.erase_value {
                return Err(ConfigError::ProjectIsErased(block.number));
            }
        }
        Ok(())
    }

    fn validate_clusters(&self) -> Result<(), ConfigError> {
        let layout = &self.layout;
        let page = layout.page();

        for (g, group) in self.groups.iter().enumerate() {
            let g = g as u8;
            if group.clusters.len() < 2 {
                return Err(ConfigError::TooFewClusters(g));
            }

            // Every block of the group plus one blank separator must fit a
            // cluster so that a compaction can never run out of room
            let needed = self
                .blocks_in_group(g)
                .fold(layout.cluster_record_len() + layout.block_record_len(), |acc, b| {
                    acc.saturating_add(self.block_footprint(b))
                })
                .saturating_add(group.reserved);

            for cluster in group.clusters.iter() {
                if cluster.start % page != 0 || cluster.length % page != 0 {
                    return Err(ConfigError::ClusterMisaligned(g));
                }
                if cluster.start.checked_add(cluster.length).is_none() || cluster.length < needed {
                    return Err(ConfigError::ClusterTooSmall(g));
                }
            }
        }

        for (g, group) in self.groups.iter().enumerate() {
            for (c, cluster) in group.clusters.iter().enumerate() {
                let overlaps = self.groups.iter().enumerate().any(|(h, other)| {
                    other.clusters.iter().enumerate().any(|(d, o)| {
                        (h, d) != (g, c) && cluster.start < o.end() && o.start < cluster.end()
                    })
                });
                if overlaps {
                    return Err(ConfigError::ClusterOverlap(g as u8));
                }
            }
        }
        Ok(())
    }
}
