//! Fee configuration loader
//!
//! Reads a TOML description of blocks, cluster groups, layout and features
//! into a validated [`FeeConfig`]. Blocks may be listed in any order; they
//! are sorted by number before validation.
//!
//! ```toml
//! [layout]
//! virtual_page_size = 8
//!
//! [[group]]
//! clusters = [{ start = 0x0000, length = 0x800 }, { start = 0x0800, length = 0x800 }]
//!
//! [[block]]
//! number = 5
//! size = 8
//! group = 0
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use fee_core::config::{ConfigError, FeeConfig};
use fee_layout::LayoutError;

/// Failure to produce a usable configuration
#[derive(Debug)]
pub enum LoadError {
    /// File could not be read
    Io(std::io::Error),
    /// TOML syntax error or a value of the wrong shape
    Parse(toml::de::Error),
    /// Well-formed but inconsistent configuration
    Config(ConfigError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "cannot read configuration: {e}"),
            LoadError::Parse(e) => write!(f, "invalid configuration file: {e}"),
            LoadError::Config(e) => write!(f, "invalid configuration: {}", describe(e)),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(e) => Some(e),
            LoadError::Parse(e) => Some(e),
            LoadError::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<toml::de::Error> for LoadError {
    fn from(e: toml::de::Error) -> Self {
        LoadError::Parse(e)
    }
}

impl From<ConfigError> for LoadError {
    fn from(e: ConfigError) -> Self {
        LoadError::Config(e)
    }
}

/// Human-readable text for a validation failure
pub fn describe(err: &ConfigError) -> String {
    match *err {
        ConfigError::Layout(LayoutError::InvalidPageSize) => {
            "virtual page size must be a power of two within the supported range".into()
        }
        ConfigError::Layout(LayoutError::InvalidFlagPattern) => {
            "flag pattern must differ from the erase value".into()
        }
        ConfigError::Layout(LayoutError::BufferTooSmall) => "layout exceeds the record buffer".into(),
        ConfigError::NoClusterGroups => "at least one [[group]] is required".into(),
        ConfigError::TooFewClusters(g) => format!("group {g} needs at least two clusters"),
        ConfigError::ClusterMisaligned(g) => {
            format!("a cluster of group {g} is not aligned to the virtual page size")
        }
        ConfigError::ClusterOverlap(g) => format!("a cluster of group {g} overlaps another cluster"),
        ConfigError::ClusterTooSmall(g) => {
            format!("clusters of group {g} cannot hold every block of the group")
        }
        ConfigError::UnsortedBlocks(n) => format!("block {n} is out of order"),
        ConfigError::DuplicateBlock(n) => format!("block {n} is defined twice"),
        ConfigError::UnknownGroup(n) => format!("block {n} refers to a missing group"),
        ConfigError::ZeroSizeBlock(n) => format!("block {n} has size 0"),
        ConfigError::BlockTooLarge(n) => format!("block {n} exceeds the maximum block size"),
        ConfigError::ProjectIsErased(n) => {
            format!("project tag of block {n} equals the erase value")
        }
        ConfigError::InvalidChunkSize => {
            "copy_chunk_size must be a non-zero page multiple no larger than the scratch buffer".into()
        }
        ConfigError::ForeignCapacity => "foreign_blocks exceeds the supported table size".into(),
    }
}

/// Parse and validate a configuration from TOML text
pub fn from_toml_str(text: &str) -> Result<FeeConfig, LoadError> {
    let mut config: FeeConfig = toml::from_str(text)?;
    config.sort_blocks();
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate the configuration file at `path`
pub fn load(path: impl AsRef<Path>) -> Result<FeeConfig, LoadError> {
    let text = fs::read_to_string(path)?;
    from_toml_str(&text)
}
