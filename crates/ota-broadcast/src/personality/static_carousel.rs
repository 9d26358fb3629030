// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulated broadcast carousel
//!
//! Cycles through a fixed list of pre-built sections in strict rotation,
//! skipping the ones the open filter would not match.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use ota_state_manager::AgentStateManager;

use super::producer_thread::{pause, ProducerThread};
use super::{Personality, PersonalityError, PersonalityResult, PumpFn};
use crate::delivery::SectionSink;
use crate::error::{SectionFilterError, SectionFilterResult};
use crate::filter::{FilterParams, ProducerModel};
use crate::section_builder::build_private_section;
use crate::time::TimeoutBudget;

const THREAD_NAME: &str = "ota-carousel";

#[derive(Debug, Default)]
struct CarouselState {
    open: bool,
    cursor: usize,
    params: Option<FilterParams>,
}

/// Backend that replays a fixed section list
pub struct StaticCarousel {
    sections: Arc<Vec<Vec<u8>>>,
    interval: Duration,
    model: ProducerModel,
    close_timeout: Duration,
    agent: Arc<AgentStateManager>,
    state: Arc<Mutex<CarouselState>>,
    sink: Option<SectionSink>,
    thread: Option<ProducerThread>,
}

impl StaticCarousel {
    pub fn new(
        sections: Vec<Vec<u8>>,
        interval: Duration,
        model: ProducerModel,
        agent: Arc<AgentStateManager>,
    ) -> Self {
        Self {
            sections: Arc::new(sections),
            interval,
            model,
            close_timeout: Duration::from_millis(3_000),
            agent,
            state: Arc::new(Mutex::new(CarouselState::default())),
            sink: None,
            thread: None,
        }
    }

    /// Carousel whose thread offers one section per `interval`
    pub fn threaded(sections: Vec<Vec<u8>>, interval: Duration, agent: Arc<AgentStateManager>) -> Self {
        Self::new(sections, interval, ProducerModel::Threaded, agent)
    }

    /// Carousel that offers one section per pump call
    pub fn cooperative(sections: Vec<Vec<u8>>, agent: Arc<AgentStateManager>) -> Self {
        Self::new(sections, Duration::ZERO, ProducerModel::Cooperative, agent)
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// A small DSM-CC style carousel: one control section and two data sections
    pub fn default_sections() -> Vec<Vec<u8>> {
        [
            (0x3B, 0x0000, &b"ota-control"[..]),
            (0x3C, 0x0001, &b"ota-block-0001"[..]),
            (0x3C, 0x0002, &b"ota-block-0002"[..]),
        ]
        .iter()
        .filter_map(|(table_id, ext, payload)| build_private_section(*table_id, *ext, payload).ok())
        .collect()
    }
}

/// Next section in rotation that matches the open filter, at most one lap
fn next_section<'a>(sections: &'a [Vec<u8>], state: &mut CarouselState) -> Option<&'a [u8]> {
    let params = state.params?;
    for _ in 0..sections.len() {
        let section = &sections[state.cursor % sections.len()];
        state.cursor = (state.cursor + 1) % sections.len();
        if params.matches_section(section) {
            return Some(section);
        }
    }
    None
}

impl Personality for StaticCarousel {
    fn name(&self) -> &str {
        "static-carousel"
    }

    fn create_section_filter(&mut self, sink: SectionSink) -> PersonalityResult<Option<PumpFn>> {
        *self.state.lock() = CarouselState::default();
        self.sink = Some(sink.clone());
        debug!(
            "[CAROUSEL] created with {} sections ({:?})",
            self.sections.len(),
            self.model
        );

        if self.model == ProducerModel::Threaded {
            return Ok(None);
        }

        let sections = self.sections.clone();
        let state = self.state.clone();
        let pump = move |budget: &mut TimeoutBudget| -> SectionFilterResult<()> {
            let section = {
                let mut state = state.lock();
                if !state.open {
                    return Err(SectionFilterError::BackendError(PersonalityError::NotOpen));
                }
                next_section(&sections, &mut state)
            };
            match section {
                Some(section) => sink.deliver(section),
                None => {
                    budget.exhaust();
                    Err(SectionFilterError::Timeout)
                }
            }
        };
        Ok(Some(Box::new(pump)))
    }

    fn open_section_filter(&mut self, params: &FilterParams) -> PersonalityResult<()> {
        {
            let mut state = self.state.lock();
            if state.open {
                return Err(PersonalityError::AlreadyOpen);
            }
            state.open = true;
            state.params = Some(*params);
        }
        info!(
            "[CAROUSEL] open pid 0x{:04X} table 0x{:X}",
            params.pid,
            params.table_id.raw()
        );

        if self.model == ProducerModel::Cooperative {
            return Ok(());
        }

        let sink = match self.sink.clone() {
            Some(sink) => sink,
            None => {
                self.state.lock().open = false;
                return Err(PersonalityError::NotCreated);
            }
        };
        let sections = self.sections.clone();
        let state = self.state.clone();
        let agent = self.agent.clone();
        let interval = self.interval;

        let spawned = ProducerThread::spawn(THREAD_NAME, move |running| {
            let mut offered = 0u64;
            while running.load(Ordering::Acquire) && !agent.is_aborting() {
                let section = {
                    let mut state = state.lock();
                    next_section(&sections, &mut state)
                };
                if let Some(section) = section {
                    let _ = sink.deliver(section);
                    offered += 1;
                }
                if !pause(&running, &agent, interval) {
                    break;
                }
            }
            debug!("[CAROUSEL] producer exiting after {} offers", offered);
        });

        match spawned {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(())
            }
            Err(e) => {
                self.state.lock().open = false;
                Err(e)
            }
        }
    }

    fn close_section_filter(&mut self) -> PersonalityResult<()> {
        {
            let mut state = self.state.lock();
            state.open = false;
            state.params = None;
        }
        match self.thread.take() {
            Some(mut thread) => thread.stop(self.close_timeout),
            None => Ok(()),
        }
    }

    fn destroy_section_filter(&mut self) -> PersonalityResult<()> {
        self.sink = None;
        *self.state.lock() = CarouselState::default();
        Ok(())
    }
}

impl std::fmt::Debug for StaticCarousel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCarousel")
            .field("sections", &self.sections.len())
            .field("interval", &self.interval)
            .field("model", &self.model)
            .finish()
    }
}
