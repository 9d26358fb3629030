// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Section pipeline errors

use crate::filter::FilterState;
use crate::personality::PersonalityError;

/// Errors raised by the section filter, the delivery gate and retrieval
#[derive(Debug, thiserror::Error)]
pub enum SectionFilterError {
    #[error("{operation} requires filter state {expected:?}, filter is {actual:?}")]
    StateMismatch {
        operation: &'static str,
        expected: FilterState,
        actual: FilterState,
    },

    #[error("section queue full")]
    Overflow,

    #[error("invalid section payload: {0}")]
    InvalidInput(String),

    #[error("filter mismatch on {field}: expected 0x{expected:X}, found 0x{found:X}")]
    FilterMismatch {
        field: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("bad CRC32 on table 0x{table_id:02X} ({len} bytes)")]
    ChecksumError { table_id: u8, len: usize },

    #[error("no section within the timeout budget")]
    Timeout,

    #[error("operation aborted")]
    Abort,

    #[error("woke up but no section data was delivered")]
    ZeroReturn,

    #[error("backend error: {0}")]
    BackendError(#[from] PersonalityError),
}

impl SectionFilterError {
    /// Counted and discarded by the gate, never a failure of the download
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SectionFilterError::Overflow
                | SectionFilterError::InvalidInput(_)
                | SectionFilterError::FilterMismatch { .. }
                | SectionFilterError::ChecksumError { .. }
        )
    }

    /// Handed to the protocol core to retry, pause or unwind
    pub fn is_surfaced(&self) -> bool {
        matches!(self, SectionFilterError::Timeout | SectionFilterError::Abort)
    }

    /// Programming or environment errors this layer never retries
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SectionFilterError::StateMismatch { .. } | SectionFilterError::BackendError(_)
        )
    }
}

pub type SectionFilterResult<T> = Result<T, SectionFilterError>;
