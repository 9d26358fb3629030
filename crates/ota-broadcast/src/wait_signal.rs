// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Producer-to-consumer wake-up
//!
//! A counting signal: every `signal()` banks one wake-up and every completed
//! wait consumes one, so a section delivered before the consumer starts
//! waiting is not lost. `interrupt()` wakes the waiter without banking a
//! wake-up; it is how an abort reaches a consumer blocked in `wait_timed`.

use parking_lot::{Condvar, Mutex};

use ota_state_manager::AbortWaker;

use crate::time::TimeoutBudget;

/// How a timed wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A banked signal was consumed
    Signalled,
    /// The budget ran out first
    TimedOut,
    /// Woken by `interrupt()`; the caller decides whether that means abort
    Interrupted,
}

#[derive(Debug, Default)]
struct SignalState {
    pending: u32,
    interrupted: bool,
}

/// Counting wait/signal handle
#[derive(Debug, Default)]
pub struct WaitSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bank one wake-up and wake a waiter
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_add(1);
        self.cond.notify_one();
    }

    /// Wake every waiter without banking a wake-up
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.cond.notify_all();
    }

    /// Wake-ups banked and not yet consumed
    pub fn pending(&self) -> u32 {
        self.state.lock().pending
    }

    /// Wait until signalled, interrupted, or the budget runs out
    ///
    /// The budget is charged for the time spent here. A banked wake-up is
    /// consumed even when the budget is already zero.
    pub fn wait_timed(&self, budget: &mut TimeoutBudget) -> WaitOutcome {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                state.interrupted = false;
                budget.charge();
                return WaitOutcome::Interrupted;
            }
            if state.pending > 0 {
                state.pending -= 1;
                budget.charge();
                return WaitOutcome::Signalled;
            }
            if budget.is_exhausted() {
                return WaitOutcome::TimedOut;
            }

            let result = self.cond.wait_for(&mut state, budget.remaining());
            budget.charge();

            if result.timed_out() && state.pending == 0 && !state.interrupted {
                // The condvar measures wall time; the tick source may lag it
                budget.exhaust();
                return WaitOutcome::TimedOut;
            }
        }
    }
}

impl AbortWaker for WaitSignal {
    fn wake_for_abort(&self) {
        self.interrupt();
    }
}
