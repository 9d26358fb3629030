// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Delivery gate
//!
//! Producers hand sections to a [`SectionSink`]. Each offer is checked in a
//! fixed order so a rejection is always attributed to the first condition it
//! violates:
//!
//! 1. filter state is Running
//! 2. the queue has a free slot
//! 3. the payload is non-empty and fits a slot
//! 4. the table id (and, when enabled, the table id extension) matches
//! 5. the integrity check passes
//!
//! Every offer bumps exactly one of the delivered/discarded counters, both on
//! the filter and on the agent-wide statistics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use crate::error::{SectionFilterError, SectionFilterResult};
use crate::filter::{FilterCore, FilterState};
use crate::section_queue::QueueError;

/// Producer-side handle onto a filter's delivery gate
///
/// Cheap to clone. Backends receive one at `create` and keep it for the
/// filter's lifetime; offers made while the filter is not Running are
/// counted and discarded.
#[derive(Clone)]
pub struct SectionSink {
    core: Arc<FilterCore>,
}

impl SectionSink {
    pub(crate) fn new(core: Arc<FilterCore>) -> Self {
        Self { core }
    }

    /// Validate and enqueue one section
    pub fn deliver(&self, section: &[u8]) -> SectionFilterResult<()> {
        let result = self.gate(section);
        match &result {
            Ok(()) => {
                self.core.delivered.fetch_add(1, Ordering::Relaxed);
                self.core.stats.record_delivered();
            }
            Err(e) => {
                self.core.discarded.fetch_add(1, Ordering::Relaxed);
                self.core.stats.record_discarded();
                trace!(
                    "[DELIVERY-GATE] discarded {} byte section: {}",
                    section.len(),
                    e
                );
            }
        }
        result
    }

    /// Sections this filter has accepted so far
    pub fn delivered_count(&self) -> u64 {
        self.core.delivered.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.core.state() == FilterState::Running
    }

    fn gate(&self, section: &[u8]) -> SectionFilterResult<()> {
        let core = &*self.core;

        // Held to the end so the state check, the capacity check and the push
        // all see the same open; `reset` on the next open waits for it
        let mut producer = core.queue.producer();

        let actual = core.state();
        if actual != FilterState::Running {
            return Err(SectionFilterError::StateMismatch {
                operation: "deliver",
                expected: FilterState::Running,
                actual,
            });
        }

        if producer.is_full() {
            producer.record_overflow();
            core.stats.record_overflow();
            return Err(SectionFilterError::Overflow);
        }

        if section.is_empty() {
            return Err(SectionFilterError::InvalidInput("empty section".into()));
        }
        if section.len() > core.queue.slot_size() {
            return Err(SectionFilterError::InvalidInput(format!(
                "{} byte section exceeds {} byte slot",
                section.len(),
                core.queue.slot_size()
            )));
        }

        let params = *core.params.lock();
        if let Some(params) = params {
            let table_id = section[0];
            if !params.table_id.matches(table_id) {
                return Err(SectionFilterError::FilterMismatch {
                    field: "table_id",
                    expected: params.table_id.raw(),
                    found: table_id as u32,
                });
            }
            if let Some(expected_ext) = params.table_id_ext_filter() {
                // Short-form sections carry no extension and are not checked
                if section.len() >= 5 {
                    let found = BigEndian::read_u16(&section[3..5]);
                    if found != expected_ext {
                        return Err(SectionFilterError::FilterMismatch {
                            field: "table_id_ext",
                            expected: expected_ext as u32,
                            found: found as u32,
                        });
                    }
                }
            }
        }

        if let Some(checksum) = &core.checksum {
            if !checksum.verify(section) {
                return Err(SectionFilterError::ChecksumError {
                    table_id: section[0],
                    len: section.len(),
                });
            }
        }

        producer.push(section).map_err(|e| match e {
            QueueError::Overflow => SectionFilterError::Overflow,
            QueueError::TooLarge { len, max } => SectionFilterError::InvalidInput(format!(
                "{} byte section exceeds {} byte slot",
                len, max
            )),
        })?;
        drop(producer);

        // Only installed when the consumer blocks on it
        if let Some(signal) = core.signal.lock().as_ref() {
            signal.signal();
        }
        Ok(())
    }
}

impl std::fmt::Debug for SectionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionSink")
            .field("state", &self.core.state())
            .field("delivered", &self.delivered_count())
            .finish()
    }
}
