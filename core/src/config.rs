//! Configuration types for SCRUTONET

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// State store configuration
    pub state: StateConfig,

    /// Scrutinizer configuration
    pub scrutinizer: ScrutinizerConfig,

    /// Vote cache configuration
    pub cache: CacheConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "scrutonet-node".to_string(),
            data_dir: PathBuf::from("./data"),
            state: StateConfig::default(),
            scrutinizer: ScrutinizerConfig::default(),
            cache: CacheConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Consensus-application state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the application merkle KV database
    pub db_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/vochain"),
        }
    }
}

/// Scrutinizer local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrutinizerConfig {
    /// Path of the scrutinizer index database
    pub db_path: PathBuf,
}

impl Default for ScrutinizerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/scrutinizer"),
        }
    }
}

/// Vote cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of checked votes kept for the DeliverTx fast path
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}
