// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks that values are in range and consistent with the selected source.

use crate::{ConfigError, ConfigResult, OtaConfig, ProducerKind, SourceKind};

/// Largest section MPEG-2 allows for private data
const MAX_SECTION_SIZE: usize = 4096;
/// Smallest section: table id plus the two length bytes
const MIN_SECTION_SIZE: usize = 3;
const MAX_PID: u16 = 0x1FFF;
const LOG_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &OtaConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_system(config, &mut errors);
    validate_section_filter(config, &mut errors);
    validate_broadcast(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_system(config: &OtaConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.system.log_level.to_uppercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(invalid(
            "system.log_level",
            format!("'{}' is not one of {:?}", config.system.log_level, LOG_LEVELS),
        ));
    }
}

fn validate_section_filter(config: &OtaConfig, errors: &mut Vec<ConfigValidationError>) {
    let settings = &config.section_filter;
    if settings.queue_depth == 0 {
        errors.push(invalid("section_filter.queue_depth", "must be at least 1"));
    }
    if !(MIN_SECTION_SIZE..=MAX_SECTION_SIZE).contains(&settings.max_section_size) {
        errors.push(invalid(
            "section_filter.max_section_size",
            format!(
                "{} is outside {}..={}",
                settings.max_section_size, MIN_SECTION_SIZE, MAX_SECTION_SIZE
            ),
        ));
    }
    if settings.close_timeout_ms == 0 {
        errors.push(invalid("section_filter.close_timeout_ms", "must be positive"));
    }
}

fn validate_broadcast(config: &OtaConfig, errors: &mut Vec<ConfigValidationError>) {
    let broadcast = &config.broadcast;
    if broadcast.pid > MAX_PID {
        errors.push(invalid(
            "broadcast.pid",
            format!("0x{:X} exceeds 13 bits", broadcast.pid),
        ));
    }

    match broadcast.source {
        SourceKind::StaticCarousel => {
            if broadcast.producer == ProducerKind::Threaded && broadcast.carousel.interval_ms == 0 {
                errors.push(invalid("broadcast.carousel.interval_ms", "must be positive"));
            }
            match broadcast.carousel.decode_sections() {
                Ok(sections) => {
                    if let Some(index) = sections
                        .iter()
                        .position(|s| s.len() < MIN_SECTION_SIZE || s.len() > config.section_filter.max_section_size)
                    {
                        errors.push(invalid(
                            "broadcast.carousel.sections",
                            format!("section {} does not fit a queue slot", index),
                        ));
                    }
                }
                Err(e) => errors.push(invalid("broadcast.carousel.sections", e.to_string())),
            }
        }
        SourceKind::TsFile => {
            if broadcast.ts_file.path.as_os_str().is_empty() {
                errors.push(ConfigValidationError::MissingRequired {
                    field: "broadcast.ts_file.path".to_string(),
                });
            }
            if broadcast.ts_file.bitrate_bps == 0 {
                errors.push(invalid("broadcast.ts_file.bitrate_bps", "must be positive"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OtaConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_queue_depth() {
        let mut config = OtaConfig::default();
        config.section_filter.queue_depth = 0;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("queue_depth"));
    }

    #[test]
    fn test_section_size_bounds() {
        let mut config = OtaConfig::default();
        config.section_filter.max_section_size = 8192;
        assert!(validate_config(&config).is_err());

        config.section_filter.max_section_size = 3;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_pid_range() {
        let mut config = OtaConfig::default();
        config.broadcast.pid = 0x2000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("broadcast.pid"));
    }

    #[test]
    fn test_ts_file_requires_path() {
        let mut config = OtaConfig::default();
        config.broadcast.source = SourceKind::TsFile;
        config.broadcast.ts_file.bitrate_bps = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("broadcast.ts_file.path"));
        assert!(err.contains("bitrate_bps"));
    }

    #[test]
    fn test_bad_carousel_section() {
        let mut config = OtaConfig::default();
        config.broadcast.carousel.sections = vec!["3c".to_string()];
        assert!(validate_config(&config).is_err());

        config.broadcast.carousel.sections = vec!["xyz0".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_log_level() {
        let mut config = OtaConfig::default();
        config.system.log_level = "chatty".to_string();
        assert!(validate_config(&config).is_err());

        config.system.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
