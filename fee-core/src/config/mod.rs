//! Static configuration
//!
//! Block table, cluster groups, flash geometry and optional features.

pub mod types;
pub mod validate;

pub use types::{
    BlockConfig, ClusterConfig, ClusterGroupConfig, FeeConfig, Features, DEFAULT_COPY_CHUNK_SIZE,
    MAX_BLOCKS, MAX_BLOCK_SIZE, MAX_CLUSTERS_PER_GROUP, MAX_CLUSTER_GROUPS, MAX_FOREIGN_BLOCKS,
    MAX_RUNTIME_BLOCKS, SCRATCH_SIZE,
};
pub use validate::ConfigError;
