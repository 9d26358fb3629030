// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # OTA State Manager
//!
//! Process-wide runtime state for the OTA agent.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Core Agent State                  │  ← Lock-free atomic state (Scan/Download/Abort/...)
//! └─────────────────────────────────────┘
//!           ↓ abort()
//! ┌─────────────────────────────────────┐
//! │   Abort Waker Registry              │  ← Weak handles to blocked waiters
//! └─────────────────────────────────────┘
//! ┌─────────────────────────────────────┐
//! │   Diagnostic Stats                  │  ← Agent-wide delivered/discarded totals
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ota_state_manager::{AgentState, AgentStateManager};
//!
//! let state = AgentStateManager::new();
//! state.set_state(AgentState::Download)?;
//!
//! // Poll points in long-running work
//! if state.is_aborting() {
//!     // unwind
//! }
//! # Ok::<(), ota_state_manager::StateError>(())
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod abort;
pub mod core_state;
pub mod diagnostics;

pub use abort::{AbortWaker, WakerRegistry};
pub use core_state::{AgentState, AgentStateManager};
pub use diagnostics::{DiagnosticSnapshot, DiagnosticStats};

/// State manager error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Invalid state transition
    InvalidTransition { from: AgentState, to: AgentState },

    /// Raw value does not name an agent state
    UnknownState(u8),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition: {:?} -> {:?}", from, to)
            }
            StateError::UnknownState(raw) => write!(f, "Unknown agent state value: {}", raw),
        }
    }
}

impl std::error::Error for StateError {}

pub type Result<T> = std::result::Result<T, StateError>;
