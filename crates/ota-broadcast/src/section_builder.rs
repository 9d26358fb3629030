// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Long-form private section construction
//!
//! Used by the static carousel and by tests to produce sections that pass
//! the delivery gate's CRC check.

use byteorder::{BigEndian, ByteOrder};

use crate::checksum::crc32_mpeg;
use crate::error::{SectionFilterError, SectionFilterResult};
use crate::MAX_SECTION_SIZE;

/// Header bytes after `section_length` (ext, version, numbers) plus CRC
const LONG_FORM_OVERHEAD: usize = 5 + 4;

/// Build a long-form private section with a valid CRC trailer
///
/// Version, section number and last section number are zero;
/// current_next_indicator is set.
pub fn build_private_section(
    table_id: u8,
    table_id_ext: u16,
    payload: &[u8],
) -> SectionFilterResult<Vec<u8>> {
    let section_length = payload.len() + LONG_FORM_OVERHEAD;
    if section_length + 3 > MAX_SECTION_SIZE {
        return Err(SectionFilterError::InvalidInput(format!(
            "payload of {} bytes does not fit a {} byte section",
            payload.len(),
            MAX_SECTION_SIZE
        )));
    }

    let mut section = Vec::with_capacity(section_length + 3);
    section.push(table_id);
    // section_syntax_indicator, private_indicator, reserved bits, 12-bit length
    section.push(0xF0 | ((section_length >> 8) as u8 & 0x0F));
    section.push(section_length as u8);
    let mut ext = [0u8; 2];
    BigEndian::write_u16(&mut ext, table_id_ext);
    section.extend_from_slice(&ext);
    section.push(0xC1);
    section.push(0x00);
    section.push(0x00);
    section.extend_from_slice(payload);

    let mut crc = [0u8; 4];
    BigEndian::write_u32(&mut crc, crc32_mpeg(&section));
    section.extend_from_slice(&crc);
    Ok(section)
}

/// `section_length` field plus the three header bytes before it
pub fn declared_section_len(header: &[u8]) -> Option<usize> {
    if header.len() < 3 {
        return None;
    }
    Some((BigEndian::read_u16(&header[1..3]) & 0x0FFF) as usize + 3)
}
