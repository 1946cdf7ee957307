//! Diagnostic snapshot of a cluster group

/// Space and compaction figures of one cluster group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RuntimeInfo {
    /// Length of the active cluster
    pub total_space: u32,
    /// Bytes available for new records
    pub free_space: u32,
    /// Header region per record
    pub header_overhead: u32,
    /// Cluster header region
    pub cluster_overhead: u32,
    /// Blank region kept between headers and payloads
    pub separator: u32,
    /// Configured reserved area
    pub reserved_space: u32,
    /// Free space has dropped into the reserved area
    pub reserved_occupied: bool,
    /// Immediate blocks allocated inside the reserved area
    pub reserved_blocks: u16,
    /// Completed compactions since init
    pub number_of_swaps: u32,
    /// Generation id of the active cluster
    pub generation: u32,
    /// Index of the active cluster
    pub active_cluster: u8,
}
