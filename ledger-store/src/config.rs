//! Configuration for the ledger store
//!
//! Configuration is an explicit value passed into components at
//! construction; nothing reads ambient process state after startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Stable identifier for this edge node
    pub node_id: String,

    /// Read back every committed transaction and verify it; a mismatch
    /// halts all ledger-mutating operations
    pub verify_writes: bool,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            node_id: "edge-node-local".to_string(),
            verify_writes: true,
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync every ledger-mutating write batch before acknowledging
    pub fsync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            // Edge hardware: small buffers, durable writes
            write_buffer_size_mb: 32,
            max_write_buffer_number: 2,
            target_file_size_mb: 64,
            max_background_jobs: 2,
            fsync_writes: true,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults with environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(node_id) = std::env::var("LEDGER_NODE_ID") {
            config.node_id = node_id;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot identify the node
    pub fn validate(&self) -> crate::Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(crate::Error::Config("node_id must not be empty".to_string()));
        }
        if self.node_id.contains('|') {
            return Err(crate::Error::Config(
                "node_id must not contain '|' (reserved key separator)".to_string(),
            ));
        }
        Ok(())
    }
}
