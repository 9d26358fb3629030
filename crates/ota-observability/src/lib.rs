// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # ota-observability
//!
//! Logging setup shared by every OTA agent binary, with per-crate debug
//! flags.
//!
//! ## Features
//! - `file-logging`: timestamped run folders with per-crate JSON log files

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

pub use cli::*;
pub use config::*;
pub use init::*;

/// Workspace crates that accept `--debug-{crate}`
pub const KNOWN_CRATES: &[&str] = &[
    "ota-agent",
    "ota-broadcast",
    "ota-config",
    "ota-observability",
    "ota-state-manager",
];
