//! Fault reporting
//!
//! Misuse of an API (development errors) and runtime faults are reported to
//! a sink. Reports are diagnostic only; the caller's control flow never
//! depends on them.

/// One fault report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultReport {
    /// Reporting module id
    pub module: u16,
    /// Instance of the module
    pub instance: u8,
    /// Id of the operation that detected the fault
    pub api: u8,
    /// Fault code
    pub code: u8,
}

/// Sink for development and runtime faults
pub trait FaultSink {
    /// Report misuse detected at an API boundary
    fn report_error(&mut self, report: FaultReport);

    /// Report a fault detected while a job was running
    fn report_runtime_error(&mut self, report: FaultReport);
}

/// Sink that drops every report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaultSink;

impl FaultSink for NoFaultSink {
    fn report_error(&mut self, _report: FaultReport) {}

    fn report_runtime_error(&mut self, _report: FaultReport) {}
}

impl<T: FaultSink + ?Sized> FaultSink for &mut T {
    fn report_error(&mut self, report: FaultReport) {
        (**self).report_error(report)
    }

    fn report_runtime_error(&mut self, report: FaultReport) {
        (**self).report_runtime_error(report)
    }
}
