//! Store-wide configuration: logging verbosity, the soft memtable
//! budget surfaced to callers for capacity planning, and the query-analyzer
//! toggle.
//!
//! Derives `serde::{Serialize, Deserialize}` so callers can load a `Config`
//! straight out of their own TOML/JSON/env-derived settings rather than
//! constructing one by hand.

use serde::{Deserialize, Serialize};

/// Mirrors the granularity a `tracing`-based setup exposes, reduced to the
/// four levels callers actually need to choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LoggingLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LoggingLevel::Error => tracing::Level::ERROR,
            LoggingLevel::Warn => tracing::Level::WARN,
            LoggingLevel::Info => tracing::Level::INFO,
            LoggingLevel::Debug => tracing::Level::DEBUG,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging_level: LoggingLevel,
    /// Advisory only: the store never enforces this, it's reported back to
    /// callers who want to decide when to shed load or shard.
    pub memtable_size_bytes: u64,
    /// When set, every query logs a structured `tracing::debug!` event
    /// describing which index bin (unique/normal/union) it chose and how
    /// many post-filters ran, in place of the original's synthesized SQL
    /// string.
    pub query_analyzer_enabled: bool,
    /// Ceiling on auto-commit retries for a `Conflict` before it's surfaced
    /// to the caller (the original retries unboundedly).
    pub max_commit_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging_level: LoggingLevel::default(),
            memtable_size_bytes: 512 * 1024 * 1024,
            query_analyzer_enabled: false,
            max_commit_retries: 128,
        }
    }
}
