// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Consumer-side retrieval
//!
//! `get_section` is the only call in the pipeline that may block. In the
//! threaded model it waits on the filter's [`WaitSignal`]; in the
//! cooperative model it calls the backend's pump in a loop. Either way the
//! caller's budget only shrinks, and abort is checked on entry and after
//! every wait or pump call, taking precedence over a timeout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::{SectionFilterError, SectionFilterResult};
use crate::filter::{FilterState, Producer, SectionFilter};
use crate::section_queue::Section;
use crate::time::TimeoutBudget;
use crate::wait_signal::{WaitOutcome, WaitSignal};

impl SectionFilter {
    /// Next section, waiting up to `timeout`
    pub fn get_section(&mut self, timeout: Duration) -> SectionFilterResult<Section<'_>> {
        let mut budget = TimeoutBudget::new(self.clock.clone(), timeout);
        self.get_section_within(&mut budget)
    }

    /// Next section, charging the wait against `budget`
    ///
    /// On return `budget` holds what is left, so a caller assembling a
    /// multi-section message can carry one budget across several calls.
    pub fn get_section_within(
        &mut self,
        budget: &mut TimeoutBudget,
    ) -> SectionFilterResult<Section<'_>> {
        if self.agent.is_aborting() {
            return Err(SectionFilterError::Abort);
        }

        let core = match self.core.as_deref() {
            Some(core) => core,
            None => {
                return Err(SectionFilterError::StateMismatch {
                    operation: "get_section",
                    expected: FilterState::Running,
                    actual: FilterState::Unknown,
                })
            }
        };
        let actual = core.state();
        if actual != FilterState::Running {
            return Err(SectionFilterError::StateMismatch {
                operation: "get_section",
                expected: FilterState::Running,
                actual,
            });
        }

        // A virtual filter is fed from outside, so there is no pump to drive
        match (self.virtual_open, self.producer.as_mut()) {
            (false, Some(Producer::Cooperative(pump))) => {
                // Sections left over from an earlier call are served first
                while core.queue.is_empty() {
                    if budget.is_exhausted() {
                        return Err(SectionFilterError::Timeout);
                    }
                    match pump(&mut *budget) {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => trace!("[SECTION-FILTER] pump returned {}", e),
                    }
                    budget.charge();
                    if self.agent.is_aborting() {
                        return Err(SectionFilterError::Abort);
                    }
                }
            }
            _ => {
                let signal: Arc<WaitSignal> = match core.signal.lock().clone() {
                    Some(signal) => signal,
                    None => {
                        return Err(SectionFilterError::StateMismatch {
                            operation: "get_section",
                            expected: FilterState::Running,
                            actual: core.state(),
                        })
                    }
                };
                loop {
                    match signal.wait_timed(budget) {
                        WaitOutcome::Signalled => break,
                        WaitOutcome::TimedOut => {
                            if self.agent.is_aborting() {
                                return Err(SectionFilterError::Abort);
                            }
                            return Err(SectionFilterError::Timeout);
                        }
                        // Stale interrupt from an abort that has since cleared
                        WaitOutcome::Interrupted if !self.agent.is_aborting() => continue,
                        WaitOutcome::Interrupted => break,
                    }
                }
            }
        }

        if self.agent.is_aborting() {
            return Err(SectionFilterError::Abort);
        }

        match core.queue.dequeue() {
            Some(section) => Ok(section),
            None => {
                warn!("[SECTION-FILTER] woke up but no section data delivered");
                Err(SectionFilterError::ZeroReturn)
            }
        }
    }
}
