//! Fee Hardware Abstraction Layer
//!
//! This crate defines the collaborators the Fee engine consumes but does not
//! implement: the asynchronous flash primitive and the development/runtime
//! fault sink. Chip-specific flash drivers implement [`FlashDriver`]; any
//! blocking `embedded-storage` NOR flash can be adapted with
//! [`nor::NorFlashDriver`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Upper layer (NvM, application)         │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  fee-core (block store engine)          │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  fee-hal (this crate - traits)          │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ chip flash    │       │ NorFlashDriver│
//! │ driver        │       │ + NorFlash    │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`flash::FlashDriver`] - Erase/read/write with deferred completion
//! - [`fault::FaultSink`] - Misuse and runtime fault reporting

#![no_std]
#![deny(unsafe_code)]

pub mod fault;
pub mod flash;
#[cfg(feature = "embedded-storage")]
pub mod nor;

// Re-export key traits at crate root for convenience
pub use fault::{FaultReport, FaultSink, NoFaultSink};
pub use flash::{Completion, DriverJobResult, FlashDriver, Mode, RequestError};
#[cfg(feature = "embedded-storage")]
pub use nor::NorFlashDriver;
