//! Engine configuration

use crate::error::RocksResult;
use rocksdb::Options;
use serde::Deserialize;
use std::path::Path;

/// RocksDB tuning options
///
/// Missing fields in a TOML document fall back to the defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Create database if missing
    pub create_if_missing: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Write buffer size
    pub write_buffer_size: usize,
    /// Maximum write buffers
    pub max_write_buffer_number: i32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
            max_write_buffer_number: 3,
        }
    }
}

impl DbConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> RocksResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> RocksResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Database-wide RocksDB options
    pub(crate) fn db_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(self.create_if_missing);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts
    }
}
