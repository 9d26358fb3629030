// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Section filter lifecycle
//!
//! ```text
//!   Unknown ──create()──► Stopped ──open()──► Running
//!      ▲                   │  ▲                 │
//!      └────destroy()──────┘  └────close()──────┘
//! ```
//!
//! Queue storage exists from `create` to `destroy` and is only reset, never
//! reallocated, by `open`. Every lifecycle call made in the wrong state fails
//! with `StateMismatch` and leaves the state untouched.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use ota_state_manager::{AbortWaker, AgentState, AgentStateManager, DiagnosticStats};

use crate::checksum::{Crc32Mpeg, SectionChecksum};
use crate::delivery::SectionSink;
use crate::error::{SectionFilterError, SectionFilterResult};
use crate::personality::{Personality, PumpFn};
use crate::section_queue::SectionQueue;
use crate::time::{MonotonicClock, TickSource};
use crate::wait_signal::WaitSignal;
use crate::{DEFAULT_QUEUE_DEPTH, MAX_SECTION_SIZE};

/// Wildcard table id as carried on the wire by older callers
pub const TID_ANY: u32 = 0xFFFF_FFFF;

/// Filter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum FilterState {
    Unknown = 0,
    Stopped = 1,
    Running = 2,
}

impl FilterState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => FilterState::Stopped,
            2 => FilterState::Running,
            _ => FilterState::Unknown,
        }
    }
}

/// Table id selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TableIdMatch {
    Any,
    Exact(u8),
}

impl TableIdMatch {
    /// Any value outside the 8-bit range, [`TID_ANY`] included, is the wildcard
    pub fn from_raw(raw: u32) -> Self {
        u8::try_from(raw).map_or(TableIdMatch::Any, TableIdMatch::Exact)
    }

    /// Wire form, [`TID_ANY`] for the wildcard
    pub fn raw(&self) -> u32 {
        match self {
            TableIdMatch::Any => TID_ANY,
            TableIdMatch::Exact(table_id) => *table_id as u32,
        }
    }

    pub fn matches(&self, table_id: u8) -> bool {
        match self {
            TableIdMatch::Any => true,
            TableIdMatch::Exact(expected) => *expected == table_id,
        }
    }
}

/// Active filter parameters, held only while Running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterParams {
    pub pid: u16,
    pub table_id: TableIdMatch,
    pub table_id_ext: u16,
    pub enable_table_id_ext: bool,
}

impl FilterParams {
    pub fn new(pid: u16, table_id: TableIdMatch) -> Self {
        Self {
            pid,
            table_id,
            table_id_ext: 0,
            enable_table_id_ext: false,
        }
    }

    pub fn with_table_id_ext(mut self, table_id_ext: u16) -> Self {
        self.table_id_ext = table_id_ext;
        self.enable_table_id_ext = true;
        self
    }

    /// Extension to match, if extension filtering is on
    pub fn table_id_ext_filter(&self) -> Option<u16> {
        self.enable_table_id_ext.then_some(self.table_id_ext)
    }

    /// Whether `section` passes the table id and extension filters
    ///
    /// Sections too short to carry an extension pass the extension check.
    pub fn matches_section(&self, section: &[u8]) -> bool {
        match section.first() {
            Some(table_id) if self.table_id.matches(*table_id) => {}
            _ => return false,
        }
        match self.table_id_ext_filter() {
            Some(ext) if section.len() >= 5 => BigEndian::read_u16(&section[3..5]) == ext,
            _ => true,
        }
    }
}

/// Section filter sizing and policy
#[derive(Debug, Clone)]
pub struct SectionFilterConfig {
    pub queue_depth: usize,
    pub max_section_size: usize,
    pub verify_crc: bool,
    /// How long `close` lets a backend wind down its producer thread
    pub close_timeout: Duration,
}

impl Default for SectionFilterConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_section_size: MAX_SECTION_SIZE,
            verify_crc: true,
            close_timeout: Duration::from_millis(3_000),
        }
    }
}

impl SectionFilterConfig {
    pub fn from_settings(settings: &ota_config::SectionFilterSettings) -> Self {
        Self {
            queue_depth: settings.queue_depth,
            max_section_size: settings.max_section_size,
            verify_crc: settings.verify_crc,
            close_timeout: Duration::from_millis(settings.close_timeout_ms),
        }
    }
}

/// Where sections come from, fixed at `create`
pub enum Producer {
    /// A backend-owned thread calls `deliver` on its own
    Threaded,
    /// The consumer drives the backend by calling this pump
    Cooperative(PumpFn),
}

impl Producer {
    pub fn model(&self) -> ProducerModel {
        match self {
            Producer::Threaded => ProducerModel::Threaded,
            Producer::Cooperative(_) => ProducerModel::Cooperative,
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Producer::Threaded => f.write_str("Threaded"),
            Producer::Cooperative(_) => f.write_str("Cooperative(<pump>)"),
        }
    }
}

/// Concurrency model without the pump attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProducerModel {
    Threaded,
    Cooperative,
}

/// Per-filter counters and queue metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterDiagnostics {
    pub state: FilterState,
    pub delivered: u64,
    pub discarded: u64,
    pub queued: usize,
    pub capacity: usize,
    pub high_water: usize,
}

/// State shared between the filter owner and every [`SectionSink`]
pub(crate) struct FilterCore {
    state: AtomicU8,
    pub(crate) params: Mutex<Option<FilterParams>>,
    pub(crate) queue: SectionQueue,
    pub(crate) signal: Mutex<Option<Arc<WaitSignal>>>,
    pub(crate) checksum: Option<Arc<dyn SectionChecksum>>,
    pub(crate) delivered: AtomicU64,
    pub(crate) discarded: AtomicU64,
    pub(crate) stats: Arc<DiagnosticStats>,
}

impl FilterCore {
    fn new(
        config: &SectionFilterConfig,
        checksum: Option<Arc<dyn SectionChecksum>>,
        stats: Arc<DiagnosticStats>,
    ) -> Self {
        Self {
            state: AtomicU8::new(FilterState::Stopped as u8),
            params: Mutex::new(None),
            queue: SectionQueue::new(config.queue_depth, config.max_section_size),
            signal: Mutex::new(None),
            checksum,
            delivered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            stats,
        }
    }

    pub(crate) fn state(&self) -> FilterState {
        FilterState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: FilterState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// One section filter and the backend that feeds it
pub struct SectionFilter {
    pub(crate) personality: Box<dyn Personality>,
    config: SectionFilterConfig,
    checksum: Option<Arc<dyn SectionChecksum>>,
    pub(crate) agent: Arc<AgentStateManager>,
    stats: Arc<DiagnosticStats>,
    pub(crate) clock: Arc<dyn TickSource>,
    pub(crate) core: Option<Arc<FilterCore>>,
    pub(crate) producer: Option<Producer>,
    pub(crate) virtual_open: bool,
}

impl SectionFilter {
    pub fn new(
        personality: Box<dyn Personality>,
        config: SectionFilterConfig,
        agent: Arc<AgentStateManager>,
        stats: Arc<DiagnosticStats>,
    ) -> Self {
        let checksum: Option<Arc<dyn SectionChecksum>> = if config.verify_crc {
            Some(Arc::new(Crc32Mpeg))
        } else {
            None
        };
        Self {
            personality,
            config,
            checksum,
            agent,
            stats,
            clock: Arc::new(MonotonicClock::new()),
            core: None,
            producer: None,
            virtual_open: false,
        }
    }

    /// Replace the tick source used for timeout budgets
    pub fn with_clock(mut self, clock: Arc<dyn TickSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the integrity check; `None` disables it
    pub fn with_checksum(mut self, checksum: Option<Arc<dyn SectionChecksum>>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn state(&self) -> FilterState {
        self.core
            .as_ref()
            .map_or(FilterState::Unknown, |core| core.state())
    }

    pub fn config(&self) -> &SectionFilterConfig {
        &self.config
    }

    /// Concurrency model chosen at `create`
    pub fn producer_model(&self) -> Option<ProducerModel> {
        self.producer.as_ref().map(Producer::model)
    }

    /// Parameters of the running filter
    pub fn params(&self) -> Option<FilterParams> {
        self.core.as_ref().and_then(|core| *core.params.lock())
    }

    pub fn backend_name(&self) -> &str {
        self.personality.name()
    }

    fn require(&self, operation: &'static str, expected: FilterState) -> SectionFilterResult<()> {
        let actual = self.state();
        if actual != expected {
            return Err(SectionFilterError::StateMismatch {
                operation,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Reserve the tuner and section hardware for a scan or download
    pub fn acquire_hardware(&mut self, event: AgentState) -> SectionFilterResult<()> {
        self.personality.acquire_hardware(event)?;
        Ok(())
    }

    pub fn release_hardware(&mut self) -> SectionFilterResult<()> {
        self.personality.release_hardware()?;
        Ok(())
    }

    /// Unknown → Stopped: allocate the queue and let the backend choose a producer model
    pub fn create(&mut self) -> SectionFilterResult<()> {
        self.require("create", FilterState::Unknown)?;

        let core = Arc::new(FilterCore::new(
            &self.config,
            self.checksum.clone(),
            self.stats.clone(),
        ));
        let sink = SectionSink::new(core.clone());

        match self.personality.create_section_filter(sink) {
            Ok(pump) => {
                let producer = pump.map_or(Producer::Threaded, Producer::Cooperative);
                info!(
                    "[SECTION-FILTER] created on {} backend, {:?} producer, {} x {} byte slots",
                    self.personality.name(),
                    producer.model(),
                    core.queue.capacity(),
                    core.queue.slot_size()
                );
                self.producer = Some(producer);
                self.core = Some(core);
                Ok(())
            }
            Err(e) => {
                // Never published, so the filter stays Unknown
                core.set_state(FilterState::Unknown);
                warn!("[SECTION-FILTER] backend {} failed to create: {}", self.personality.name(), e);
                Err(e.into())
            }
        }
    }

    /// Stopped → Running with `params`
    pub fn open(&mut self, params: FilterParams) -> SectionFilterResult<()> {
        self.open_inner(params, false)
    }

    /// Stopped → Running without starting the backend
    ///
    /// Sections are expected to arrive through a [`SectionSink`] from some
    /// other source (a file or network download replaying broadcast data).
    pub fn open_virtual(&mut self, params: FilterParams) -> SectionFilterResult<()> {
        self.open_inner(params, true)
    }

    fn open_inner(&mut self, params: FilterParams, virtual_open: bool) -> SectionFilterResult<()> {
        self.require("open", FilterState::Stopped)?;
        let core = match &self.core {
            Some(core) => core.clone(),
            None => {
                return Err(SectionFilterError::StateMismatch {
                    operation: "open",
                    expected: FilterState::Stopped,
                    actual: FilterState::Unknown,
                })
            }
        };

        core.queue.reset();
        *core.params.lock() = Some(params);

        // A pump-driven consumer polls instead of waiting, unless the sections
        // come from outside the backend
        let pumped = matches!(self.producer, Some(Producer::Cooperative(_)));
        if virtual_open || !pumped {
            let signal = Arc::new(WaitSignal::new());
            let waker: Arc<dyn AbortWaker> = signal.clone();
            self.agent.register_abort_waker(Arc::downgrade(&waker));
            *core.signal.lock() = Some(signal);
        }

        // Running before the backend starts so its first sections are kept
        core.set_state(FilterState::Running);

        if !virtual_open {
            if let Err(e) = self.personality.open_section_filter(&params) {
                core.set_state(FilterState::Stopped);
                *core.params.lock() = None;
                core.signal.lock().take();
                warn!(
                    "[SECTION-FILTER] backend {} failed to open pid=0x{:04X}: {}",
                    self.personality.name(),
                    params.pid,
                    e
                );
                return Err(e.into());
            }
        }

        self.virtual_open = virtual_open;
        info!(
            "[SECTION-FILTER] opened pid=0x{:04X} table_id={:?} ext={:?}{}",
            params.pid,
            params.table_id,
            params.table_id_ext_filter(),
            if virtual_open { " (virtual)" } else { "" }
        );
        Ok(())
    }

    /// Running → Stopped: halt the backend and release the wait signal
    ///
    /// The filter is Stopped even when the backend reports an error.
    pub fn close(&mut self) -> SectionFilterResult<()> {
        self.require("close", FilterState::Running)?;
        let core = match &self.core {
            Some(core) => core.clone(),
            None => return Ok(()),
        };

        core.set_state(FilterState::Stopped);
        *core.params.lock() = None;

        let result = if self.virtual_open {
            Ok(())
        } else {
            self.personality.close_section_filter()
        };
        self.virtual_open = false;

        // Dropping the last strong handle also unregisters it from abort fan-out
        core.signal.lock().take();

        debug!(
            "[SECTION-FILTER] closed, delivered={} discarded={}",
            core.delivered.load(Ordering::Relaxed),
            core.discarded.load(Ordering::Relaxed)
        );

        result.map_err(|e| {
            warn!("[SECTION-FILTER] backend {} failed to close: {}", self.personality.name(), e);
            e.into()
        })
    }

    /// Stopped → Unknown: free the queue and let the backend release its buffers
    pub fn destroy(&mut self) -> SectionFilterResult<()> {
        self.require("destroy", FilterState::Stopped)?;

        if let Some(core) = self.core.take() {
            core.set_state(FilterState::Unknown);
        }
        self.producer = None;

        self.personality.destroy_section_filter()?;
        info!("[SECTION-FILTER] destroyed");
        Ok(())
    }

    /// Producer-side handle for sources other than the backend
    pub fn sink(&self) -> Option<SectionSink> {
        self.core.as_ref().map(|core| SectionSink::new(core.clone()))
    }

    /// Offer a section through the delivery gate
    pub fn deliver(&self, section: &[u8]) -> SectionFilterResult<()> {
        match &self.core {
            Some(core) => SectionSink::new(core.clone()).deliver(section),
            None => {
                self.stats.record_discarded();
                Err(SectionFilterError::StateMismatch {
                    operation: "deliver",
                    expected: FilterState::Running,
                    actual: FilterState::Unknown,
                })
            }
        }
    }

    /// Overflows since the previous call; resets the counter
    pub fn take_overflow_count(&self) -> u32 {
        self.core
            .as_ref()
            .map_or(0, |core| core.queue.take_overflow_count())
    }

    pub fn peek_high_water_mark(&self) -> usize {
        self.core
            .as_ref()
            .map_or(0, |core| core.queue.peek_high_water())
    }

    pub fn clear_high_water_mark(&self) {
        if let Some(core) = &self.core {
            core.queue.clear_high_water();
        }
    }

    pub fn diagnostics(&self) -> FilterDiagnostics {
        match &self.core {
            Some(core) => FilterDiagnostics {
                state: core.state(),
                delivered: core.delivered.load(Ordering::Relaxed),
                discarded: core.discarded.load(Ordering::Relaxed),
                queued: core.queue.len(),
                capacity: core.queue.capacity(),
                high_water: core.queue.peek_high_water(),
            },
            None => FilterDiagnostics {
                state: FilterState::Unknown,
                delivered: 0,
                discarded: 0,
                queued: 0,
                capacity: 0,
                high_water: 0,
            },
        }
    }
}

impl Drop for SectionFilter {
    fn drop(&mut self) {
        if self.state() == FilterState::Running {
            if let Err(e) = self.close() {
                warn!("[SECTION-FILTER] close on drop failed: {}", e);
            }
        }
        if self.state() == FilterState::Stopped {
            if let Err(e) = self.destroy() {
                warn!("[SECTION-FILTER] destroy on drop failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SectionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionFilter")
            .field("backend", &self.personality.name())
            .field("state", &self.state())
            .field("producer", &self.producer)
            .field("virtual_open", &self.virtual_open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality::PersonalityResult;
    use crate::section_builder::build_private_section;
    use crate::time::TimeoutBudget;

    /// Backend that only decides the producer model
    struct ModelBackend {
        cooperative: bool,
    }

    impl Personality for ModelBackend {
        fn name(&self) -> &str {
            "model"
        }

        fn create_section_filter(&mut self, _sink: SectionSink) -> PersonalityResult<Option<PumpFn>> {
            if !self.cooperative {
                return Ok(None);
            }
            let pump: PumpFn = Box::new(|_budget: &mut TimeoutBudget| -> SectionFilterResult<()> {
                Ok(())
            });
            Ok(Some(pump))
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

    fn created(cooperative: bool) -> SectionFilter {
        let mut filter = SectionFilter::new(
            Box::new(ModelBackend { cooperative }),
            SectionFilterConfig::default(),
            Arc::new(AgentStateManager::new()),
            Arc::new(DiagnosticStats::new()),
        );
        filter.create().unwrap();
        filter
    }

    fn pending_wakeups(filter: &SectionFilter) -> Option<u32> {
        let core = filter.core.as_ref().unwrap();
        let signal = core.signal.lock();
        signal.as_ref().map(|signal| signal.pending())
    }

    #[test]
    fn test_threaded_delivery_banks_one_wakeup_each() {
        let mut filter = created(false);
        filter.open(FilterParams::new(0x41, TableIdMatch::Any)).unwrap();

        let section = build_private_section(0x3B, 1, b"wake").unwrap();
        filter.deliver(&section).unwrap();
        filter.deliver(&section).unwrap();
        assert_eq!(pending_wakeups(&filter), Some(2));

        filter.close().unwrap();
        assert_eq!(pending_wakeups(&filter), None);
    }

    #[test]
    fn test_pumped_filter_has_no_wait_signal() {
        let mut filter = created(true);
        filter.open(FilterParams::new(0x41, TableIdMatch::Any)).unwrap();
        assert_eq!(pending_wakeups(&filter), None);

        let section = build_private_section(0x3B, 1, b"pumped").unwrap();
        filter.deliver(&section).unwrap();
        assert_eq!(pending_wakeups(&filter), None);
        assert_eq!(filter.diagnostics().queued, 1);
    }

    #[test]
    fn test_virtual_open_on_pumped_filter_waits_on_signal() {
        let mut filter = created(true);
        filter
            .open_virtual(FilterParams::new(0x41, TableIdMatch::Any))
            .unwrap();

        let section = build_private_section(0x3B, 1, b"replayed").unwrap();
        filter.deliver(&section).unwrap();
        assert_eq!(pending_wakeups(&filter), Some(1));

        let received = filter.get_section(Duration::from_millis(100)).unwrap();
        assert_eq!(&*received, section.as_slice());
    }
}
