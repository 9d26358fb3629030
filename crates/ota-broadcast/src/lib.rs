// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # ota-broadcast
//!
//! Moves MPEG-2 private sections from a data source (tuner demultiplexer,
//! simulated carousel, transport stream file) into the protocol core.
//!
//! ## Architecture
//!
//! ```text
//!   Personality backend ──deliver()──► DeliveryGate ──► SectionQueue ──► WaitSignal
//!   (thread or pump)                   (validate)       (fixed ring)      (wake)
//!                                                                            │
//!   protocol core ◄──── Section guard ◄──── get_section(timeout) ◄──────────┘
//! ```
//!
//! The producer is either a thread owned by the backend
//! ([`Producer::Threaded`]) or a pump function the consumer calls from its
//! own thread ([`Producer::Cooperative`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ota_broadcast::{FilterParams, SectionFilter, SectionFilterConfig, TableIdMatch};
//! use ota_broadcast::personality::StaticCarousel;
//! use ota_state_manager::{AgentStateManager, DiagnosticStats};
//!
//! let agent = Arc::new(AgentStateManager::new());
//! let stats = Arc::new(DiagnosticStats::new());
//! let backend = StaticCarousel::threaded(Vec::new(), Duration::from_millis(100), agent.clone());
//!
//! let mut filter = SectionFilter::new(Box::new(backend), SectionFilterConfig::default(), agent, stats);
//! filter.create()?;
//! filter.open(FilterParams::new(0x41, TableIdMatch::Exact(0x3B)))?;
//! let section = filter.get_section(Duration::from_millis(1000))?;
//! println!("table 0x{:02X}, {} bytes", section.table_id(), section.len());
//! # Ok::<(), ota_broadcast::SectionFilterError>(())
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod checksum;
pub mod delivery;
pub mod error;
pub mod filter;
pub mod packet_assembler;
pub mod personality;
mod retrieval;
pub mod section_builder;
pub mod section_queue;
pub mod time;
pub mod wait_signal;

pub use checksum::{crc32_mpeg, verify_section_crc, Crc32Mpeg, SectionChecksum};
pub use delivery::SectionSink;
pub use error::{SectionFilterError, SectionFilterResult};
pub use filter::{
    FilterDiagnostics, FilterParams, FilterState, Producer, ProducerModel, SectionFilter,
    SectionFilterConfig, TableIdMatch,
};
pub use packet_assembler::{packetize, PacketAssembler, TS_PACKET_SIZE, TS_SYNC_BYTE};
pub use personality::{
    build_personality, Personality, PersonalityError, PersonalityResult, PumpFn,
};
pub use section_builder::build_private_section;
pub use section_queue::{QueueError, Section, SectionQueue};
pub use time::{MonotonicClock, TickSource, TimeoutBudget};
pub use wait_signal::{WaitOutcome, WaitSignal};

/// Largest MPEG-2 private section the pipeline carries
pub const MAX_SECTION_SIZE: usize = 4096;

/// Default number of queued sections
pub const DEFAULT_QUEUE_DEPTH: usize = 8;
