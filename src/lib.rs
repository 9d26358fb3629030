// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # OTA Agent
//!
//! Broadcast side of an over-the-air software download agent: filters
//! MPEG-2 private sections off a broadcast source and hands them, one at a
//! time, to the download protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: ota-config                                 │
//! │  (TOML + environment + CLI overrides)                   │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Infrastructure: ota-state-manager, ota-observability   │
//! │  (Agent state, abort fan-out, counters, logging)        │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Broadcast: ota-broadcast                               │
//! │  (Section filter, queue, delivery gate, backends)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ota_agent::prelude::*;
//!
//! let config = ota_agent::config::load_config(None, None)?;
//! let agent = Arc::new(AgentStateManager::new());
//! let stats = Arc::new(DiagnosticStats::new());
//!
//! let filter_config = SectionFilterConfig::from_settings(&config.section_filter);
//! let backend = build_personality(&config.broadcast, &filter_config, agent.clone(), stats.clone())?;
//! let mut filter = SectionFilter::new(backend, filter_config, agent, stats);
//!
//! filter.create()?;
//! filter.open(FilterParams::new(config.broadcast.pid, TableIdMatch::Any))?;
//! let section = filter.get_section(Duration::from_secs(1))?;
//! println!("table 0x{:02X}", section.table_id());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use ota_broadcast as broadcast;
pub use ota_config as config;
pub use ota_observability as observability;
pub use ota_state_manager as state_manager;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::broadcast::{
        build_personality, FilterParams, FilterState, Personality, Section, SectionFilter,
        SectionFilterConfig, SectionFilterError, SectionSink, TableIdMatch,
    };
    pub use crate::config::{OtaConfig, ProducerKind, SourceKind};
    pub use crate::state_manager::{AgentState, AgentStateManager, DiagnosticStats};
}
