//! Pipeline configuration.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::message::Table;

/// Root directory for spill buffers when none is configured.
pub const BUFFER_DIRECTORY_DEFAULT_BASE: &str = "/var/tmp/keryx";

/// Everything needed to start a transaction stream, loaded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// The PostgreSQL data directory whose WAL is tailed.
    pub data_dir: PathBuf,

    /// One connection string per database to populate rows from.
    pub pg_conn_strings: Vec<String>,

    /// Process-wide memory ceiling for the transaction buffer, in bytes.
    /// Zero means the built-in default.
    #[serde(default)]
    pub buffer_max: u64,

    /// `db.ns.table` to column-list map of relations to exclude.
    /// A column list of `["*"]` excludes the whole table.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub exclude: HashMap<String, Vec<String>>,

    /// `db.ns.table` to column-list map of relations to include. When
    /// non-empty, everything not listed is dropped.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub include: HashMap<String, Vec<String>>,

    /// Spill directory for the transaction buffer. When empty, one is
    /// created under [`BUFFER_DIRECTORY_DEFAULT_BASE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_directory: Option<PathBuf>,

    /// Entry-count threshold above which transactions are summarized
    /// instead of populated. Zero disables summarizing.
    #[serde(default)]
    pub max_message_per_txn: usize,
}

/// Errors from loading the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The file is not valid configuration JSON.
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read {:?}: {}", path, source)
            }
            ConfigError::Parse(err) => write!(f, "invalid configuration: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads a configuration from a JSON file.
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Config, ConfigError> {
        let path = path.into();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ConfigError::Io { path, source })?;
        serde_json::from_slice(&bytes).map_err(ConfigError::Parse)
    }

    /// The tables named by the include map.
    pub fn included_tables(&self) -> Vec<Table> {
        self.include
            .keys()
            .filter_map(|name| Table::from_full_name(name))
            .collect()
    }

    /// The tables named by the exclude map, ignoring wildcard-only entries.
    pub fn excluded_tables(&self) -> Vec<Table> {
        self.exclude
            .iter()
            .filter(|(_, columns)| !(columns.len() == 1 && columns[0] == "*"))
            .filter_map(|(name, _)| Table::from_full_name(name))
            .collect()
    }

    /// The configured buffer directory, or a fresh one under the default
    /// base.
    pub fn buffer_directory_or_temp(&self) -> io::Result<PathBuf> {
        if let Some(dir) = &self.buffer_directory {
            std::fs::create_dir_all(dir)?;
            return Ok(dir.clone());
        }

        let base = Path::new(BUFFER_DIRECTORY_DEFAULT_BASE);
        std::fs::create_dir_all(base)?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = base.join(format!("buffer-{}-{}", std::process::id(), nanos));
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }
}
