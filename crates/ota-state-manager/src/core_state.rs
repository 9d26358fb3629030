// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Lock-free agent state with abort fan-out

use std::sync::Weak;

use atomic_polyfill::{AtomicU64, AtomicU8, Ordering};

use crate::abort::{AbortWaker, WakerRegistry};
use crate::{Result, StateError};

/// Public agent state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AgentState {
    /// Scanning for an update (also the idle state)
    Scan = 0,
    /// Downloading an update
    Download = 1,
    /// Download finished, waiting to install
    DownloadDone = 2,
    /// Abandon the current operation and return to sleep
    Abort = 3,
    /// Shutting down; terminal
    Exit = 4,
}

impl AgentState {
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(AgentState::Scan),
            1 => Ok(AgentState::Download),
            2 => Ok(AgentState::DownloadDone),
            3 => Ok(AgentState::Abort),
            4 => Ok(AgentState::Exit),
            other => Err(StateError::UnknownState(other)),
        }
    }
}

/// Shared agent state
///
/// One instance is shared (behind an `Arc`) by everything that needs the
/// process-wide abort query. Reads are a single atomic load.
pub struct AgentStateManager {
    state: AtomicU8,
    /// Bumped on every transition, lets pollers notice an abort they missed
    generation: AtomicU64,
    wakers: WakerRegistry,
}

impl AgentStateManager {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(AgentState::Scan as u8),
            generation: AtomicU64::new(0),
            wakers: WakerRegistry::new(),
        }
    }

    /// Current agent state
    pub fn state(&self) -> AgentState {
        // Only valid discriminants are ever stored
        AgentState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(AgentState::Scan)
    }

    /// Transition to `next`
    ///
    /// `Exit` is terminal. Moving into `Abort` wakes every registered waiter.
    pub fn set_state(&self, next: AgentState) -> Result<()> {
        let current = self.state();
        if current == AgentState::Exit && next != AgentState::Exit {
            return Err(StateError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        self.state.store(next as u8, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);

        if next == AgentState::Abort && current != AgentState::Abort {
            let woken = self.wakers.wake_all();
            tracing::info!("[AGENT-STATE] abort raised, woke {} waiter(s)", woken);
        } else {
            tracing::debug!("[AGENT-STATE] {:?} -> {:?}", current, next);
        }
        Ok(())
    }

    /// Raise the abort condition
    pub fn abort(&self) -> Result<()> {
        self.set_state(AgentState::Abort)
    }

    /// Leave the abort condition and go back to scanning
    pub fn clear_abort(&self) -> Result<()> {
        if self.state() == AgentState::Abort {
            self.set_state(AgentState::Scan)?;
        }
        Ok(())
    }

    /// Poll-point query used by every blocking or looping operation
    pub fn is_aborting(&self) -> bool {
        self.state.load(Ordering::Acquire) == AgentState::Abort as u8
    }

    /// Number of transitions since construction
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Register a waiter to be woken when abort is raised
    pub fn register_abort_waker(&self, waker: Weak<dyn AbortWaker>) {
        self.wakers.register(waker);
    }
}

impl Default for AgentStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStateManager")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}
