//! Status values visible to callers

/// Module status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Not initialized, or the last init failed
    Uninit,
    /// Ready to accept a job
    Idle,
    /// A user job is running
    Busy,
    /// The scan or a compaction is running
    BusyInternal,
}

impl Status {
    /// Check if a job of any kind is running
    pub fn is_busy(&self) -> bool {
        matches!(self, Status::Busy | Status::BusyInternal)
    }
}

/// Result of the last job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JobResult {
    /// Finished successfully
    Ok,
    /// Still running
    Pending,
    /// A flash operation failed or space ran out
    Failed,
    /// Aborted by `cancel`
    Cancelled,
    /// Block was never written or has been invalidated
    BlockInvalid,
    /// Block record exists but was never completed
    BlockInconsistent,
}

/// Resolved state of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockStatus {
    /// No usable record
    #[default]
    Invalid,
    /// Latest record is complete
    Valid,
    /// Latest record was invalidated (reported only if the layout asks for it)
    Invalidated,
    /// Latest record exists but its validity flag was never written
    Inconsistent,
    /// Payload could not be read during the last compaction
    InconsistentCopy,
}

impl BlockStatus {
    /// Check if the record carries over into a compacted cluster
    pub fn survives_swap(&self) -> bool {
        matches!(
            self,
            BlockStatus::Valid | BlockStatus::Inconsistent | BlockStatus::InconsistentCopy
        )
    }

    /// Check if the block has no readable record
    pub fn is_invalid(&self) -> bool {
        matches!(self, BlockStatus::Invalid | BlockStatus::Invalidated)
    }
}
