//! Runtime tables rebuilt by the scan
//!
//! - Per-block status and addresses, configured blocks first, then foreign
//!   blocks in adoption order
//! - Per-group active cluster and write cursors
//! - Bitmap of immediate blocks living in the reserved area

pub mod blocks;
pub mod group;
pub mod info;
pub mod reserved;

pub use blocks::{BlockRuntimeInfo, BlockTable};
pub use group::{Allocation, Cursors, GroupRuntime};
pub use info::RuntimeInfo;
pub use reserved::ReservedMap;
