// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Section filter probe.
//!
//! Loads the agent configuration, opens a section filter on the configured
//! broadcast source, prints the sections it receives and finishes with the
//! filter and agent counters as JSON.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use ota_broadcast::{
    build_personality, FilterParams, SectionFilter, SectionFilterConfig, SectionFilterError,
    TableIdMatch,
};
use ota_config::{
    apply_cli_overrides, apply_environment_overrides, load_config, validate_config, ConfigError,
    OtaConfig,
};
use ota_observability::{
    debug_flags_help, parse_debug_flags, FileLogging, LoggingConfig, LoggingGuard,
};
use ota_state_manager::{AgentState, AgentStateManager, DiagnosticStats};

struct ProbeArgs {
    config: Option<PathBuf>,
    timeout: Duration,
    count: usize,
    overrides: HashMap<String, String>,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: section_probe [--config <path>] [--timeout-ms <n>] [--count <n>] \
         [--set <key>=<value>]... [--debug-<crate>]...\n\n\
         Defaults:\n\
         - config: $OTA_CONFIG_PATH or ./ota_configuration.toml, built-in defaults if absent\n\
         - timeout-ms: 1000\n\
         - count: 10\n\n\
         {}",
        debug_flags_help()
    );
    process::exit(2);
}

fn parse_number<T: std::str::FromStr>(value: Option<String>) -> T {
    value
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| usage_and_exit())
}

fn parse_args() -> ProbeArgs {
    let mut parsed = ProbeArgs {
        config: None,
        timeout: Duration::from_millis(1_000),
        count: 10,
        overrides: HashMap::new(),
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                parsed.config = Some(PathBuf::from(v));
            }
            "--timeout-ms" => parsed.timeout = Duration::from_millis(parse_number(args.next())),
            "--count" => parsed.count = parse_number(args.next()),
            "--set" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit());
                match v.split_once('=') {
                    Some((key, value)) => {
                        parsed.overrides.insert(key.to_string(), value.to_string());
                    }
                    None => usage_and_exit(),
                }
            }
            "-h" | "--help" => usage_and_exit(),
            // Consumed by parse_debug_flags
            other if other.starts_with("--debug-") => {}
            other => {
                eprintln!("Unknown argument: {other}");
                usage_and_exit();
            }
        }
    }

    parsed
}

/// Configuration file if there is one, otherwise defaults with the same overrides
fn resolve_config(args: &ProbeArgs) -> Result<OtaConfig> {
    let config = match load_config(args.config.as_deref(), Some(&args.overrides)) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound(_)) if args.config.is_none() => {
            let mut config = OtaConfig::default();
            apply_environment_overrides(&mut config);
            apply_cli_overrides(&mut config, &args.overrides);
            config
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };
    validate_config(&config)?;
    Ok(config)
}

fn init_logging(config: &OtaConfig) -> Result<LoggingGuard> {
    let flags = parse_debug_flags();
    let mut logging = LoggingConfig {
        level: config.system.log_level.clone(),
        ..LoggingConfig::default()
    };
    if config.system.debug {
        logging.level = "debug".to_string();
    }
    if config.logging.file_logging {
        logging.file = Some(FileLogging {
            log_dir: config.logging.log_dir.clone(),
            retention_days: config.logging.retention_days,
            retention_runs: config.logging.retention_runs,
        });
    }

    #[cfg(feature = "file-logging")]
    {
        ota_observability::init_logging(&flags, &logging)
    }
    #[cfg(not(feature = "file-logging"))]
    {
        let guard = ota_observability::init_console_logging(&flags, &logging)?;
        if logging.file.is_some() {
            warn!("[PROBE] file logging requested but not compiled in; logging to console only");
        }
        Ok(guard)
    }
}

fn run(args: ProbeArgs, config: OtaConfig) -> Result<()> {
    let agent = Arc::new(AgentStateManager::new());
    let stats = Arc::new(DiagnosticStats::new());
    let filter_config = SectionFilterConfig::from_settings(&config.section_filter);
    let backend = build_personality(
        &config.broadcast,
        &filter_config,
        agent.clone(),
        stats.clone(),
    )
    .context("Failed to build broadcast backend")?;

    let mut filter = SectionFilter::new(backend, filter_config, agent.clone(), stats.clone());
    filter.acquire_hardware(AgentState::Scan)?;
    filter.create()?;

    let broadcast = &config.broadcast;
    let params = FilterParams {
        pid: broadcast.pid,
        table_id: TableIdMatch::from_raw(broadcast.table_id_raw()),
        table_id_ext: broadcast.table_id_ext,
        enable_table_id_ext: broadcast.enable_table_id_ext,
    };
    filter.open(params)?;
    info!(
        "[PROBE] {} source on pid 0x{:04X}, {:?} producer",
        broadcast.source,
        broadcast.pid,
        filter.producer_model()
    );

    let mut received = 0;
    let mut timeouts = 0;
    for attempt in 0..args.count {
        match filter.get_section(args.timeout) {
            Ok(section) => {
                received += 1;
                let ext = match section.get(3..5) {
                    Some(ext) => format!("0x{:02X}{:02X}", ext[0], ext[1]),
                    None => "-".to_string(),
                };
                println!(
                    "section {:>3}: table 0x{:02X} ext {} {} bytes",
                    attempt,
                    section.table_id(),
                    ext,
                    section.len()
                );
            }
            Err(SectionFilterError::Timeout) => {
                timeouts += 1;
                println!("section {:>3}: timeout after {:?}", attempt, args.timeout);
            }
            Err(e) if e.is_fatal() || matches!(e, SectionFilterError::Abort) => {
                return Err(e).context("Section retrieval failed");
            }
            Err(e) => warn!("[PROBE] attempt {} failed: {}", attempt, e),
        }
    }

    let report = json!({
        "backend": filter.backend_name(),
        "received": received,
        "timeouts": timeouts,
        "overflows": filter.take_overflow_count(),
        "filter": filter.diagnostics(),
        "agent": stats.snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    filter.close()?;
    filter.destroy()?;
    filter.release_hardware()?;
    Ok(())
}

fn main() {
    let args = parse_args();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            process::exit(2);
        }
    };

    let _guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            process::exit(2);
        }
    };

    if let Err(e) = run(args, config) {
        eprintln!("{e:#}");
        process::exit(1);
    }
}
