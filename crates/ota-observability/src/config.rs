// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Observability configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level (trace, debug, info, warn, error)
    pub level: String,

    /// Per-run JSON log folders, when file logging is wanted
    pub file: Option<FileLogging>,
}

/// Where run folders go and how many are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogging {
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        FileLogging {
            log_dir: PathBuf::from("./logs"),
            retention_days: 7,
            retention_runs: 10,
        }
    }
}

impl LoggingConfig {
    /// Normalized `EnvFilter` level; `WARNING` is accepted as `warn`
    pub fn filter_level(&self) -> String {
        match self.level.to_lowercase().as_str() {
            "warning" => "warn".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_level_normalizes() {
        let config = LoggingConfig {
            level: "WARNING".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(config.filter_level(), "warn");
        assert_eq!(LoggingConfig::default().filter_level(), "info");
    }
}
