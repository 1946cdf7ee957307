//! Per-group cluster state and space accounting
//!
//! Headers grow upward from just past the cluster header, payloads grow
//! downward from the cluster end. One blank header region (the separator)
//! always stays between the two cursors so that a scan finds the end of
//! the header list.

use fee_layout::Layout;

use crate::config::ClusterConfig;

/// Space handed out for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Allocation {
    /// Header region address
    pub header: u32,
    /// Payload address
    pub data: u32,
}

/// Write cursors of one cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cursors {
    /// Next free header region
    pub header: u32,
    /// Lowest payload byte in use
    pub data: u32,
}

impl Cursors {
    /// Cursors of an empty, formatted cluster
    pub fn empty(cluster: &ClusterConfig, layout: &Layout) -> Self {
        Self {
            header: cluster.start + layout.cluster_record_len(),
            data: cluster.end(),
        }
    }

    /// Bytes available for new records, excluding the separator
    pub fn free_space(&self, layout: &Layout) -> u32 {
        self.data
            .saturating_sub(self.header)
            .saturating_sub(layout.block_record_len())
    }

    /// Check if a record with `size` payload bytes fits while keeping
    /// `keep` bytes free
    pub fn fits(&self, layout: &Layout, size: u16, keep: u32) -> bool {
        let need = layout.block_record_len() + layout.data_len(size);
        self.free_space(layout) >= need.saturating_add(keep)
    }

    /// Hand out a header region and payload space; caller checked `fits`
    pub fn allocate(&mut self, layout: &Layout, size: u16) -> Allocation {
        let header = self.header;
        self.header += layout.block_record_len();
        self.data -= layout.data_len(size);
        Allocation {
            header,
            data: self.data,
        }
    }
}

/// Runtime state of one cluster group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GroupRuntime {
    /// Index of the active cluster
    pub active: u8,
    /// Generation id of the active cluster
    pub generation: u32,
    /// Write cursors of the active cluster
    pub cursors: Cursors,
    /// Next allocation must compact first
    pub force_swap: bool,
    /// A record could not be adopted; compacting would lose it
    pub foreign_overflow: bool,
    /// Completed compactions since init
    pub swaps: u32,
}

impl GroupRuntime {
    /// Make `cluster` the active, empty cluster with `generation`
    pub fn activate(&mut self, index: u8, cluster: &ClusterConfig, generation: u32, layout: &Layout) {
        self.active = index;
        self.generation = generation;
        self.cursors = Cursors::empty(cluster, layout);
    }
}
