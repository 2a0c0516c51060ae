//! Configuration management for the DAMDS loader
//!
//! Settings come from a TOML file, are overridden by `DAMDS_*` environment
//! variables and finally by command-line flags in the binary.

use crate::core::error::{Error, Result};
use crate::core::types::{ByteOrder, EntryKind};
use crate::partition::policy::Distribution;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cluster decomposition
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Source matrix description
    pub matrix: MatrixConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cluster decomposition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of participating nodes
    pub node_count: usize,

    /// Worker threads per node
    pub thread_count: usize,

    /// Memory-mapped scratch regions per node
    pub mmaps_per_node: usize,

    /// Directory holding the scratch files
    pub scratch_dir: PathBuf,
}

/// Source matrix settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Flat binary distance matrix
    pub distance_matrix_file: PathBuf,

    /// Row (and column) count of the matrix
    pub number_data_points: usize,

    /// Entries are stored most significant byte first
    #[serde(default)]
    pub is_big_endian: bool,

    /// Entries are signed shorts (otherwise unsigned)
    #[serde(default = "default_is_signed")]
    pub is_signed: bool,

    /// Rows per tile
    pub block_size: usize,

    /// Tile ownership strategy
    #[serde(default)]
    pub distribution: Distribution,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

fn default_is_signed() -> bool {
    true
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_count: 1,
            thread_count: num_cpus::get().max(1),
            mmaps_per_node: 1,
            scratch_dir: PathBuf::from("."),
        }
    }
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            distance_matrix_file: PathBuf::from("distances.bin"),
            number_data_points: 0,
            is_big_endian: false,
            is_signed: true,
            block_size: 64,
            distribution: Distribution::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl MatrixConfig {
    /// Byte order selected by `is_big_endian`
    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_big_endian_flag(self.is_big_endian)
    }

    /// Entry interpretation selected by `is_signed`
    pub fn entry_kind(&self) -> EntryKind {
        if self.is_signed {
            EntryKind::Signed
        } else {
            EntryKind::Unsigned
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::path(path, format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(nodes) = lookup("DAMDS_NODE_COUNT") {
            self.cluster.node_count = nodes.parse()
                .map_err(|e| Error::config(format!("Invalid node count: {}", e)))?;
        }

        if let Some(threads) = lookup("DAMDS_THREAD_COUNT") {
            self.cluster.thread_count = threads.parse()
                .map_err(|e| Error::config(format!("Invalid thread count: {}", e)))?;
        }

        if let Some(mmaps) = lookup("DAMDS_MMAPS_PER_NODE") {
            self.cluster.mmaps_per_node = mmaps.parse()
                .map_err(|e| Error::config(format!("Invalid mmaps per node: {}", e)))?;
        }

        if let Some(dir) = lookup("DAMDS_SCRATCH_DIR") {
            self.cluster.scratch_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("DAMDS_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    ///
    /// Filesystem checks (scratch directory writable, matrix size) happen when
    /// the topology and geometry are built; this only rejects values that can
    /// never be right.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.node_count < 1 {
            return Err(Error::config("node_count must be at least 1"));
        }
        if self.cluster.thread_count < 1 {
            return Err(Error::config("thread_count must be at least 1"));
        }
        if self.cluster.mmaps_per_node < 1 {
            return Err(Error::config("mmaps_per_node must be at least 1"));
        }
        if self.matrix.number_data_points < 1 {
            return Err(Error::geometry("number_data_points must be at least 1"));
        }
        if self.matrix.block_size < 1 || self.matrix.block_size > self.matrix.number_data_points {
            return Err(Error::geometry(format!(
                "block_size {} must be in 1..={}",
                self.matrix.block_size, self.matrix.number_data_points
            )));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            _ => Err(Error::config("Invalid log format")),
        }
    }
}
