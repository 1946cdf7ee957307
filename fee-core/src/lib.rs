//! Flash EEPROM emulation engine
//!
//! Persists fixed-size logical blocks in raw erase-block flash and survives
//! power loss at any point:
//!
//! - Static configuration types and their validation
//! - Runtime tables rebuilt by a flash scan at init
//! - Cluster swap (compaction) reclaiming superseded records
//! - Job scheduler running one flash operation at a time
//! - Public API over any [`FlashDriver`](fee_hal::FlashDriver)
//!
//! ```text
//!        ┌──────────────────── Fee ─────────────────────┐
//! API ──▶│  Engine (scan / swap / user jobs)            │
//!        │     │ Step::Submit(op)      ▲ Event          │
//!        │     ▼                       │                │
//!        │  FlashDriver ── job_end / job_error ─────────│──▶ notifications
//!        └──────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod config;
pub mod engine;
pub mod fee;
pub mod runtime;
pub mod shared;
pub mod state;

pub use config::{BlockConfig, ClusterConfig, ClusterGroupConfig, ConfigError, FeeConfig, Features};
pub use engine::Engine;
pub use fee::{Fee, Notifications};
pub use runtime::RuntimeInfo;
pub use shared::SharedFee;
pub use state::{ApiError, BlockStatus, JobResult, RuntimeFault, Status};

/// Module and release identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VersionInfo {
    /// Vendor id
    pub vendor_id: u16,
    /// Module id used in fault reports
    pub module_id: u16,
    /// Major release
    pub sw_major: u8,
    /// Minor release
    pub sw_minor: u8,
    /// Patch release
    pub sw_patch: u8,
}

/// Version of this crate
pub const VERSION: VersionInfo = VersionInfo {
    vendor_id: 0,
    module_id: state::MODULE_ID,
    sw_major: 0,
    sw_minor: 1,
    sw_patch: 0,
};
