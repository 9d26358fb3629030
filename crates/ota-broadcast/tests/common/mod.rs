// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the section pipeline integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ota_broadcast::{
    FilterParams, Personality, PersonalityError, PersonalityResult, PumpFn, SectionFilter, SectionFilterConfig,
    SectionSink, TickSource,
};
use ota_state_manager::{AgentStateManager, DiagnosticStats};

/// Backend that produces nothing and records which hooks ran
#[derive(Clone, Default)]
pub struct IdleBackend {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub sink: Arc<Mutex<Option<SectionSink>>>,
}

impl IdleBackend {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl Personality for IdleBackend {
    fn name(&self) -> &str {
        "idle"
    }

    fn create_section_filter(&mut self, sink: SectionSink) -> PersonalityResult<Option<PumpFn>> {
        self.calls.lock().push("create");
        *self.sink.lock() = Some(sink);
        Ok(None)
    }

    fn open_section_filter(&mut self, _params: &FilterParams) -> PersonalityResult<()> {
        self.calls.lock().push("open");
        Ok(())
    }

    fn close_section_filter(&mut self) -> PersonalityResult<()> {
        self.calls.lock().push("close");
        Ok(())
    }

    fn destroy_section_filter(&mut self) -> PersonalityResult<()> {
        self.calls.lock().push("destroy");
        *self.sink.lock() = None;
        Ok(())
    }
}

/// Threaded backend whose open and close fail on request
///
/// `open` first hands `on_open` to the sink, then fails if `fail_open` is set.
#[derive(Clone, Default)]
pub struct FailingBackend {
    pub fail_open: Arc<AtomicBool>,
    pub fail_close: Arc<AtomicBool>,
    pub on_open: Arc<Mutex<Vec<Vec<u8>>>>,
    pub sink: Arc<Mutex<Option<SectionSink>>>,
}

impl Personality for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    fn create_section_filter(&mut self, sink: SectionSink) -> PersonalityResult<Option<PumpFn>> {
        *self.sink.lock() = Some(sink);
        Ok(None)
    }

    fn open_section_filter(&mut self, _params: &FilterParams) -> PersonalityResult<()> {
        if let Some(sink) = self.sink.lock().as_ref() {
            for section in self.on_open.lock().iter() {
                let _ = sink.deliver(section);
            }
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(PersonalityError::HardwareUnavailable("tuner busy".into()));
        }
        Ok(())
    }

    fn close_section_filter(&mut self) -> PersonalityResult<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(PersonalityError::StillRunning {
                name: "failing-producer".into(),
                waited: Duration::from_millis(10),
            });
        }
        Ok(())
    }

    fn destroy_section_filter(&mut self) -> PersonalityResult<()> {
        *self.sink.lock() = None;
        Ok(())
    }
}

/// Backend whose pump is supplied by the test
pub struct PumpBackend {
    pump: Option<PumpFn>,
}

impl PumpBackend {
    pub fn new(pump: PumpFn) -> Self {
        Self { pump: Some(pump) }
    }
}

impl Personality for PumpBackend {
    fn name(&self) -> &str {
        "test-pump"
    }

    fn create_section_filter(&mut self, _sink: SectionSink) -> PersonalityResult<Option<PumpFn>> {
        Ok(self.pump.take())
    }

    fn open_section_filter(&mut self, _params: &FilterParams) -> PersonalityResult<()> {
        Ok(())
    }

    fn close_section_filter(&mut self) -> PersonalityResult<()> {
        Ok(())
    }

    fn destroy_section_filter(&mut self) -> PersonalityResult<()> {
        Ok(())
    }
}

/// Tick source that only moves when told to
#[derive(Default)]
pub struct StepClock(AtomicU64);

impl StepClock {
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TickSource for StepClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn filter_with(
    backend: Box<dyn Personality>,
    queue_depth: usize,
) -> (SectionFilter, Arc<AgentStateManager>, Arc<DiagnosticStats>) {
    let agent = Arc::new(AgentStateManager::new());
    let stats = Arc::new(DiagnosticStats::new());
    let config = SectionFilterConfig {
        queue_depth,
        ..SectionFilterConfig::default()
    };
    let filter = SectionFilter::new(backend, config, agent.clone(), stats.clone());
    (filter, agent, stats)
}
