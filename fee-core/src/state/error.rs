//! Misuse and runtime fault codes
//!
//! Every rejected call and every runtime fault is reported to the
//! [`FaultSink`](fee_hal::FaultSink) as module id, instance, API id and code.

use fee_hal::FaultReport;

/// Module id used in fault reports
pub const MODULE_ID: u16 = 21;

/// Operation ids used in fault reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ApiId {
    Init = 0x00,
    SetMode = 0x01,
    Read = 0x02,
    Write = 0x03,
    Cancel = 0x04,
    GetStatus = 0x05,
    GetJobResult = 0x06,
    InvalidateBlock = 0x07,
    GetVersionInfo = 0x08,
    EraseImmediateBlock = 0x09,
    JobEnd = 0x10,
    JobError = 0x11,
    MainFunction = 0x12,
    GetRuntimeInfo = 0x20,
    ForceSwap = 0x21,
}

/// Call rejected at the API boundary; no state was changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApiError {
    /// Module not initialized
    Uninit,
    /// Block number not configured or discovered
    InvalidBlockNumber,
    /// Offset outside the block
    InvalidOffset,
    /// Caller buffer missing or too small
    InvalidBuffer,
    /// Length zero or past the block end
    InvalidLength,
    /// A user job is running
    Busy,
    /// The scan or a compaction is running
    BusyInternal,
    /// Nothing to cancel
    InvalidCancel,
    /// Cluster group index out of range
    InvalidClusterGroup,
    /// Operation requires an immediate-data block
    NotImmediate,
    /// Engine already borrowed by an interrupted caller
    Reentrant,
}

impl ApiError {
    /// Fault code reported to the sink
    pub fn code(&self) -> u8 {
        match self {
            ApiError::Uninit => 0x01,
            ApiError::InvalidBlockNumber => 0x02,
            ApiError::InvalidOffset => 0x03,
            ApiError::InvalidBuffer => 0x04,
            ApiError::InvalidLength => 0x05,
            ApiError::Busy => 0x06,
            ApiError::BusyInternal => 0x07,
            ApiError::InvalidCancel => 0x08,
            ApiError::InvalidClusterGroup => 0x09,
            ApiError::NotImmediate => 0x0A,
            ApiError::Reentrant => 0x0B,
        }
    }

    /// Build the report for this error raised by `api`
    pub fn report(&self, instance: u8, api: ApiId) -> FaultReport {
        FaultReport {
            module: MODULE_ID,
            instance,
            api: api as u8,
            code: self.code(),
        }
    }
}

/// Fault detected while a job was running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RuntimeFault {
    /// A block found on flash could not be adopted
    ForeignTableFull,
    /// Write does not fit even after a compaction
    OutOfSpace,
    /// The flash driver refused a request
    FlashRejected,
    /// The flash driver reported a failed job
    FlashJobFailed,
}

impl RuntimeFault {
    /// Fault code reported to the sink
    pub fn code(&self) -> u8 {
        match self {
            RuntimeFault::ForeignTableFull => 0x10,
            RuntimeFault::OutOfSpace => 0x11,
            RuntimeFault::FlashRejected => 0x12,
            RuntimeFault::FlashJobFailed => 0x13,
        }
    }

    /// Build the report for this fault
    pub fn report(&self, instance: u8) -> FaultReport {
        FaultReport {
            module: MODULE_ID,
            instance,
            api: ApiId::MainFunction as u8,
            code: self.code(),
        }
    }
}
