// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Backend contract
//!
//! A personality is whatever actually produces sections: a tuner driver, a
//! simulated carousel, a transport stream file. The filter calls it at each
//! lifecycle step and hands it a [`SectionSink`] to deliver into.
//!
//! A backend either owns a producer thread (started in
//! `open_section_filter`, stopped before `close_section_filter` returns) or
//! returns a [`PumpFn`] from `create_section_filter` that the consumer calls
//! from its own thread.

use std::sync::Arc;
use std::time::Duration;

use ota_config::{BroadcastConfig, ProducerKind, SourceKind};
use ota_state_manager::{AgentState, AgentStateManager, DiagnosticStats};

use crate::delivery::SectionSink;
use crate::error::SectionFilterResult;
use crate::filter::{FilterParams, ProducerModel, SectionFilterConfig};
use crate::time::TimeoutBudget;

mod producer_thread;
pub mod static_carousel;
pub mod ts_file;

pub use producer_thread::ProducerThread;
pub use static_carousel::StaticCarousel;
pub use ts_file::{TsFileSource, TsPacketReader};

/// Cooperative producer entry point
///
/// Each call tries to deliver one section, charging its work to the budget.
/// `Ok(())` means a section was accepted by the gate.
pub type PumpFn = Box<dyn FnMut(&mut TimeoutBudget) -> SectionFilterResult<()> + Send>;

/// Backend failures
#[derive(Debug, thiserror::Error)]
pub enum PersonalityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("section filter not created")]
    NotCreated,

    #[error("section filter not open")]
    NotOpen,

    #[error("section filter already open")]
    AlreadyOpen,

    #[error("failed to spawn producer thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("producer thread {name} still running after {waited:?}")]
    StillRunning { name: String, waited: Duration },

    #[error("producer thread {0} panicked")]
    ThreadPanicked(String),

    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
}

pub type PersonalityResult<T> = Result<T, PersonalityError>;

/// Operations the section filter needs from a backend
pub trait Personality: Send {
    fn name(&self) -> &str;

    /// Reserve tuner, section filters and download memory for `event`
    fn acquire_hardware(&mut self, _event: AgentState) -> PersonalityResult<()> {
        Ok(())
    }

    fn release_hardware(&mut self) -> PersonalityResult<()> {
        Ok(())
    }

    /// Prepare to produce into `sink`; return a pump to run cooperatively
    fn create_section_filter(&mut self, sink: SectionSink) -> PersonalityResult<Option<PumpFn>>;

    /// Start producing sections matching `params`
    fn open_section_filter(&mut self, params: &FilterParams) -> PersonalityResult<()>;

    /// Stop producing; any producer thread must have exited before this returns
    fn close_section_filter(&mut self) -> PersonalityResult<()>;

    /// Release everything allocated since `create_section_filter`
    fn destroy_section_filter(&mut self) -> PersonalityResult<()>;
}

/// Build the backend named by `[broadcast]`
pub fn build_personality(
    broadcast: &BroadcastConfig,
    filter: &SectionFilterConfig,
    agent: Arc<AgentStateManager>,
    stats: Arc<DiagnosticStats>,
) -> PersonalityResult<Box<dyn Personality>> {
    let model = match broadcast.producer {
        ProducerKind::Threaded => ProducerModel::Threaded,
        ProducerKind::Cooperative => ProducerModel::Cooperative,
    };

    match broadcast.source {
        SourceKind::StaticCarousel => {
            let mut sections = broadcast
                .carousel
                .decode_sections()
                .map_err(|e| PersonalityError::InvalidConfig(e.to_string()))?;
            if sections.is_empty() {
                sections = StaticCarousel::default_sections();
            }
            let carousel = StaticCarousel::new(
                sections,
                Duration::from_millis(broadcast.carousel.interval_ms),
                model,
                agent,
            )
            .with_close_timeout(filter.close_timeout);
            Ok(Box::new(carousel))
        }
        SourceKind::TsFile => {
            let source = TsFileSource::new(broadcast.ts_file.clone(), model, agent, stats)
                .with_close_timeout(filter.close_timeout)
                .with_max_section_size(filter.max_section_size);
            Ok(Box::new(source))
        }
    }
}
