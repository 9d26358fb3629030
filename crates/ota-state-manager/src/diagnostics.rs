// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Agent-wide diagnostic counters
//!
//! Totals accumulate across every section filter the agent creates. Counters
//! are monotonic; nothing here is ever decremented.

use atomic_polyfill::{AtomicU64, Ordering};

/// Agent-wide statistics sink
#[derive(Debug, Default)]
pub struct DiagnosticStats {
    sections_delivered: AtomicU64,
    sections_discarded: AtomicU64,
    overflows: AtomicU64,
    packets_read: AtomicU64,
}

/// Point-in-time copy of [`DiagnosticStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagnosticSnapshot {
    pub sections_delivered: u64,
    pub sections_discarded: u64,
    pub overflows: u64,
    pub packets_read: u64,
}

impl DiagnosticStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self) {
        self.sections_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.sections_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packets(&self, count: u64) {
        self.packets_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn sections_delivered(&self) -> u64 {
        self.sections_delivered.load(Ordering::Relaxed)
    }

    pub fn sections_discarded(&self) -> u64 {
        self.sections_discarded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            sections_delivered: self.sections_delivered.load(Ordering::Relaxed),
            sections_discarded: self.sections_discarded.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            packets_read: self.packets_read.load(Ordering::Relaxed),
        }
    }
}
