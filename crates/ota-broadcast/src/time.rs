// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tick source and remaining-time budgets

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic millisecond tick
pub trait TickSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// [`TickSource`] backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Caller-supplied remaining-time budget
///
/// The budget only ever shrinks. Each [`charge`](Self::charge) subtracts the
/// ticks elapsed since the previous checkpoint, so calling it from several
/// layers of the same poll loop never counts the same interval twice. A tick
/// that moves backwards charges nothing.
pub struct TimeoutBudget {
    remaining_ms: u64,
    last_tick: u64,
    clock: Arc<dyn TickSource>,
}

impl TimeoutBudget {
    pub fn new(clock: Arc<dyn TickSource>, timeout: Duration) -> Self {
        let last_tick = clock.now_ms();
        Self {
            remaining_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
            last_tick,
            clock,
        }
    }

    pub fn from_millis(clock: Arc<dyn TickSource>, timeout_ms: u64) -> Self {
        Self::new(clock, Duration::from_millis(timeout_ms))
    }

    /// Subtract the time elapsed since the last checkpoint; returns the ms charged
    pub fn charge(&mut self) -> u64 {
        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(self.last_tick);
        self.last_tick = now.max(self.last_tick);
        self.remaining_ms = self.remaining_ms.saturating_sub(elapsed);
        elapsed
    }

    /// Drop whatever is left
    pub fn exhaust(&mut self) {
        self.remaining_ms = 0;
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_ms)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_ms == 0
    }

    pub fn clock(&self) -> &Arc<dyn TickSource> {
        &self.clock
    }
}

impl std::fmt::Debug for TimeoutBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutBudget")
            .field("remaining_ms", &self.remaining_ms)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Hand-driven tick source
    #[derive(Default)]
    pub(crate) struct ManualClock(pub(crate) AtomicU64);

    impl ManualClock {
        pub(crate) fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }

        pub(crate) fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl TickSource for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_charge_subtracts_elapsed_once() {
        let clock = Arc::new(ManualClock::default());
        let mut budget = TimeoutBudget::from_millis(clock.clone(), 100);

        clock.advance(30);
        assert_eq!(budget.charge(), 30);
        assert_eq!(budget.charge(), 0);
        assert_eq!(budget.remaining_ms(), 70);
    }

    #[test]
    fn test_budget_saturates_at_zero() {
        let clock = Arc::new(ManualClock::default());
        let mut budget = TimeoutBudget::from_millis(clock.clone(), 50);

        clock.advance(500);
        budget.charge();
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_backwards_tick_charges_nothing() {
        let clock = Arc::new(ManualClock::default());
        clock.set(1_000);
        let mut budget = TimeoutBudget::from_millis(clock.clone(), 100);

        clock.set(900);
        assert_eq!(budget.charge(), 0);
        assert_eq!(budget.remaining_ms(), 100);

        // Measured from the high-water tick, not the rolled-back one
        clock.set(1_020);
        assert_eq!(budget.charge(), 20);
        assert_eq!(budget.remaining_ms(), 80);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now_ms() >= a);
    }
}
