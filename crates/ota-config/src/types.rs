// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! Each struct maps to a table in `ota_configuration.toml`. Every field has
//! a default, so a file only needs the values it changes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Table id value meaning "any table"
pub const TABLE_ID_ANY: u32 = 0xFFFF_FFFF;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OtaConfig {
    pub system: SystemConfig,
    pub section_filter: SectionFilterSettings,
    pub broadcast: BroadcastConfig,
    pub logging: LoggingConfig,
}

/// Process-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub debug: bool,
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "INFO".to_string(),
        }
    }
}

/// Section queue sizing and gate policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SectionFilterSettings {
    pub queue_depth: usize,
    pub max_section_size: usize,
    pub verify_crc: bool,
    /// Upper bound on waiting for a producer thread at close
    pub close_timeout_ms: u64,
}

impl Default for SectionFilterSettings {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            max_section_size: 4096,
            verify_crc: true,
            close_timeout_ms: 3_000,
        }
    }
}

/// Where sections come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    StaticCarousel,
    TsFile,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static_carousel" | "carousel" => Ok(SourceKind::StaticCarousel),
            "ts_file" | "file" => Ok(SourceKind::TsFile),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown broadcast source '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::StaticCarousel => f.write_str("static_carousel"),
            SourceKind::TsFile => f.write_str("ts_file"),
        }
    }
}

/// Whether the backend runs its own thread or is pumped by the consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    #[default]
    Threaded,
    Cooperative,
}

impl FromStr for ProducerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "threaded" => Ok(ProducerKind::Threaded),
            "cooperative" => Ok(ProducerKind::Cooperative),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown producer model '{}'",
                other
            ))),
        }
    }
}

/// Broadcast source and the filter it is opened with
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub source: SourceKind,
    pub producer: ProducerKind,
    pub pid: u16,
    /// Absent means any table id
    pub table_id: Option<u32>,
    pub table_id_ext: u16,
    pub enable_table_id_ext: bool,
    pub carousel: CarouselConfig,
    pub ts_file: TsFileConfig,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::StaticCarousel,
            producer: ProducerKind::Threaded,
            pid: 0x0041,
            table_id: None,
            table_id_ext: 0,
            enable_table_id_ext: false,
            carousel: CarouselConfig::default(),
            ts_file: TsFileConfig::default(),
        }
    }
}

impl BroadcastConfig {
    /// Table id in the filter's raw form, [`TABLE_ID_ANY`] when unset
    pub fn table_id_raw(&self) -> u32 {
        self.table_id.unwrap_or(TABLE_ID_ANY)
    }
}

/// Simulated carousel contents
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CarouselConfig {
    pub interval_ms: u64,
    /// Complete sections as hex strings; empty uses the built-in carousel
    pub sections: Vec<String>,
}

impl Default for CarouselConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            sections: Vec::new(),
        }
    }
}

impl CarouselConfig {
    /// Decode `sections` into raw bytes
    pub fn decode_sections(&self) -> ConfigResult<Vec<Vec<u8>>> {
        self.sections
            .iter()
            .enumerate()
            .map(|(index, text)| {
                decode_hex(text).map_err(|reason| {
                    ConfigError::InvalidValue(format!(
                        "broadcast.carousel.sections[{}]: {}",
                        index, reason
                    ))
                })
            })
            .collect()
    }
}

/// Hex string to bytes; whitespace is ignored
fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16);
            let lo = (pair[1] as char).to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                _ => Err(format!(
                    "'{}{}' is not a hex byte",
                    pair[0] as char, pair[1] as char
                )),
            }
        })
        .collect()
}

/// Transport stream capture playback
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TsFileConfig {
    pub path: PathBuf,
    pub bitrate_bps: u64,
    pub loop_playback: bool,
    /// Packets to skip at the start of the file
    pub packet_offset: u64,
    pub resync: bool,
}

impl Default for TsFileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            bitrate_bps: 90_000,
            loop_playback: true,
            packet_offset: 0,
            resync: false,
        }
    }
}

/// Log file placement and retention
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file_logging: bool,
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_logging: false,
            log_dir: PathBuf::from("./logs"),
            retention_days: 7,
            retention_runs: 10,
        }
    }
}
