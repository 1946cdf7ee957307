//! Host-side flash simulation for the Fee block store
//!
//! [`SimFlash`] is an in-memory NOR flash implementing the `embedded-storage`
//! traits. Programming only clears bits, as on real NOR flash, and faults can
//! be injected to exercise recovery:
//!
//! - a read, write or erase touching a given address fails once
//! - power is lost after a given number of programmed bytes, leaving the
//!   write in progress torn
//!
//! [`SimDriver`] wraps it in the deferred-completion [`NorFlashDriver`] and
//! [`FaultLog`] records every fault report.

pub mod flash;

pub use flash::{SimError, SimFlash, SimStats, SIM_ERASE_SIZE, SIM_WRITE_SIZE};

use fee_hal::{FaultReport, FaultSink, NorFlashDriver};

/// Transfer buffer of the simulated driver in bytes
pub const SIM_TRANSFER_SIZE: usize = 512;

/// Deferred-completion driver over a simulated flash
pub type SimDriver = NorFlashDriver<SimFlash, SIM_TRANSFER_SIZE>;

/// Create an erased simulated flash of `size` bytes behind a driver
pub fn sim_driver(size: usize) -> SimDriver {
    NorFlashDriver::new(SimFlash::new(size))
}

/// Fault sink recording every report
#[derive(Debug, Clone, Default)]
pub struct FaultLog {
    /// Misuse reports
    pub errors: Vec<FaultReport>,
    /// Runtime fault reports
    pub runtime: Vec<FaultReport>,
}

impl FaultLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a misuse report with `code` was recorded
    pub fn has_error(&self, code: u8) -> bool {
        self.errors.iter().any(|r| r.code == code)
    }

    /// Check if a runtime report with `code` was recorded
    pub fn has_runtime_error(&self, code: u8) -> bool {
        self.runtime.iter().any(|r| r.code == code)
    }
}

impl FaultSink for FaultLog {
    fn report_error(&mut self, report: FaultReport) {
        self.errors.push(report);
    }

    fn report_runtime_error(&mut self, report: FaultReport) {
        self.runtime.push(report);
    }
}
