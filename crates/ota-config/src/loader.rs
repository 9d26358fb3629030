// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, OtaConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "ota_configuration.toml";

/// Find the OTA agent configuration file
///
/// Search order:
/// 1. `OTA_CONFIG_PATH` environment variable
/// 2. Current working directory: `./ota_configuration.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("OTA_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by OTA_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd;
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent.to_path_buf();
                }
                None => break,
            }
        }
    }

    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "OTA configuration file '{}' not found in any of these locations:\n{}\n\nSet OTA_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<OtaConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: OtaConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

fn parse_bool(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

/// Decimal or `0x`-prefixed hex
fn parse_number(value: &str) -> Option<u64> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Apply one named override; unknown keys and unparsable values are ignored
fn apply_override(config: &mut OtaConfig, key: &str, value: &str) {
    match key {
        "log_level" => config.system.log_level = value.to_string(),
        "debug" => config.system.debug = parse_bool(value),
        "queue_depth" => {
            if let Some(depth) = parse_number(value) {
                config.section_filter.queue_depth = depth as usize;
            }
        }
        "max_section_size" => {
            if let Some(size) = parse_number(value) {
                config.section_filter.max_section_size = size as usize;
            }
        }
        "verify_crc" => config.section_filter.verify_crc = parse_bool(value),
        "close_timeout_ms" => {
            if let Some(ms) = parse_number(value) {
                config.section_filter.close_timeout_ms = ms;
            }
        }
        "source" => {
            if let Ok(source) = value.parse() {
                config.broadcast.source = source;
            }
        }
        "producer" => {
            if let Ok(producer) = value.parse() {
                config.broadcast.producer = producer;
            }
        }
        "pid" => {
            if let Some(pid) = parse_number(value).and_then(|p| u16::try_from(p).ok()) {
                config.broadcast.pid = pid;
            }
        }
        "table_id" => {
            if value.eq_ignore_ascii_case("any") {
                config.broadcast.table_id = None;
            } else if let Some(tid) = parse_number(value).and_then(|t| u32::try_from(t).ok()) {
                config.broadcast.table_id = Some(tid);
            }
        }
        "table_id_ext" => {
            if let Some(ext) = parse_number(value).and_then(|e| u16::try_from(e).ok()) {
                config.broadcast.table_id_ext = ext;
                config.broadcast.enable_table_id_ext = true;
            }
        }
        "interval_ms" => {
            if let Some(ms) = parse_number(value) {
                config.broadcast.carousel.interval_ms = ms;
            }
        }
        "ts_file" => config.broadcast.ts_file.path = PathBuf::from(value),
        "bitrate_bps" => {
            if let Some(bps) = parse_number(value) {
                config.broadcast.ts_file.bitrate_bps = bps;
            }
        }
        "loop_playback" => config.broadcast.ts_file.loop_playback = parse_bool(value),
        "log_dir" => config.logging.log_dir = PathBuf::from(value),
        "file_logging" => config.logging.file_logging = parse_bool(value),
        _ => {}
    }
}

/// Override keys, paired with the environment variable for each
const OVERRIDES: &[(&str, &str)] = &[
    ("log_level", "OTA_LOG_LEVEL"),
    ("queue_depth", "OTA_QUEUE_DEPTH"),
    ("max_section_size", "OTA_MAX_SECTION_SIZE"),
    ("verify_crc", "OTA_VERIFY_CRC"),
    ("close_timeout_ms", "OTA_CLOSE_TIMEOUT_MS"),
    ("source", "OTA_SOURCE"),
    ("producer", "OTA_PRODUCER"),
    ("pid", "OTA_PID"),
    ("table_id", "OTA_TABLE_ID"),
    ("table_id_ext", "OTA_TABLE_ID_EXT"),
    ("interval_ms", "OTA_CAROUSEL_INTERVAL_MS"),
    ("ts_file", "OTA_TS_FILE"),
    ("bitrate_bps", "OTA_TS_BITRATE"),
    ("loop_playback", "OTA_TS_LOOP"),
    ("log_dir", "OTA_LOG_DIR"),
    ("file_logging", "OTA_FILE_LOGGING"),
];

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `OTA_LOG_LEVEL` -> `system.log_level`
/// - `OTA_QUEUE_DEPTH`, `OTA_MAX_SECTION_SIZE`, `OTA_VERIFY_CRC`, `OTA_CLOSE_TIMEOUT_MS` -> `section_filter.*`
/// - `OTA_SOURCE`, `OTA_PRODUCER`, `OTA_PID`, `OTA_TABLE_ID` (`any` clears it), `OTA_TABLE_ID_EXT` -> `broadcast.*`
/// - `OTA_CAROUSEL_INTERVAL_MS` -> `broadcast.carousel.interval_ms`
/// - `OTA_TS_FILE`, `OTA_TS_BITRATE`, `OTA_TS_LOOP` -> `broadcast.ts_file.*`
/// - `OTA_LOG_DIR`, `OTA_FILE_LOGGING` -> `logging.*`
///
/// `OTA_DEBUG` is not read here; it selects per-crate debug logging.
pub fn apply_environment_overrides(config: &mut OtaConfig) {
    for (key, var) in OVERRIDES {
        if let Ok(value) = env::var(var) {
            apply_override(config, key, &value);
        }
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"pid": "0x41", "queue_depth": "16"}`).
///   Accepts the keys of the environment overrides plus `debug`.
pub fn apply_cli_overrides(config: &mut OtaConfig, cli_args: &HashMap<String, String>) {
    for (key, value) in cli_args {
        apply_override(config, key, value);
    }
}
