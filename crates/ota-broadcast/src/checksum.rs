// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CRC-32/MPEG-2 section integrity check
//!
//! Polynomial 0x04C11DB7, MSB first, initial value 0xFFFFFFFF, no final xor.
//! The last four bytes of a long-form section carry the CRC of everything
//! before them, big-endian. A trailer of zero means the section carries no
//! CRC and is accepted as-is.

use byteorder::{BigEndian, ByteOrder};

const CRC32_MPEG_POLY: u32 = 0x04C1_1DB7;

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_MPEG_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

/// CRC-32/MPEG-2 of `data`
pub fn crc32_mpeg(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc = CRC_TABLE[((crc >> 24) as u8 ^ byte) as usize] ^ (crc << 8);
    }
    crc
}

/// Check the trailing CRC of a complete section
///
/// Sections shorter than the four-byte trailer fail.
pub fn verify_section_crc(section: &[u8]) -> bool {
    if section.len() < 4 {
        return false;
    }
    let (body, trailer) = section.split_at(section.len() - 4);
    let carried = BigEndian::read_u32(trailer);
    carried == 0 || crc32_mpeg(body) == carried
}

/// Pluggable integrity check run by the delivery gate
pub trait SectionChecksum: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, section: &[u8]) -> bool;
}

/// Default integrity check
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Mpeg;

impl SectionChecksum for Crc32Mpeg {
    fn name(&self) -> &'static str {
        "crc32-mpeg2"
    }

    fn verify(&self, section: &[u8]) -> bool {
        verify_section_crc(section)
    }
}
