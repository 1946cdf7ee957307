//! Flash primitive abstraction
//!
//! The flash driver accepts one job at a time and finishes it later. A job
//! is requested with [`FlashDriver::erase`], [`FlashDriver::write`] or
//! [`FlashDriver::read`]; the request only validates and latches the job.
//! The work happens in [`FlashDriver::main_function`] (or in an interrupt),
//! and the end of the job is reported as a [`Completion`].

/// Reasons for a driver to refuse a job request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// Another job is still in progress
    Busy,
    /// Address range lies outside the device
    OutOfRange,
    /// Address or length violates the device alignment
    Unaligned,
    /// Transfer exceeds the driver buffer
    TooLarge,
}

/// Result of the last driver job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverJobResult {
    /// Last job finished successfully
    Ok,
    /// A job is in progress
    Pending,
    /// Last job failed in hardware
    Failed,
    /// Last job was cancelled
    Cancelled,
}

/// End-of-job event delivered to the Fee engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Job finished successfully
    JobEnd,
    /// Job failed
    JobError,
}

/// Driver operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Bounded work per main function call
    #[default]
    Slow,
    /// As much work per call as the hardware allows
    Fast,
}

/// Asynchronous flash primitive
///
/// Implementations should handle:
/// - At most one outstanding job
/// - Copying write data at request time
/// - Buffering read data until the next request
pub trait FlashDriver {
    /// Request an erase of `length` bytes starting at `address`
    fn erase(&mut self, address: u32, length: u32) -> Result<(), RequestError>;

    /// Request a write of `data` at `address`
    ///
    /// The driver copies `data`; the caller may reuse its buffer immediately.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), RequestError>;

    /// Request a read of `length` bytes at `address`
    ///
    /// The bytes are available from [`FlashDriver::read_data`] once the job
    /// ended with [`Completion::JobEnd`].
    fn read(&mut self, address: u32, length: u32) -> Result<(), RequestError>;

    /// Data of the last completed read job
    fn read_data(&self) -> &[u8];

    /// Abort the job in progress, if any
    fn cancel(&mut self);

    /// Switch the operating mode
    fn set_mode(&mut self, mode: Mode);

    /// Result of the last job
    fn job_result(&self) -> DriverJobResult;

    /// Advance the job in progress
    ///
    /// Returns the completion event once the job has finished.
    fn main_function(&mut self) -> Option<Completion>;
}
