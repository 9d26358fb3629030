// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transport stream packet to section reassembly
//!
//! ```text
//!   ┌──────┬─────────┬──────────────────────────────────────────┐
//!   │ 0x47 │ TEI/PUSI│  [adaptation] [pointer] section bytes... │  188 bytes
//!   │      │ PID(13) │                                          │
//!   └──────┴─────────┴──────────────────────────────────────────┘
//! ```
//!
//! Packets on the filtered PID are stitched into sections. A section may
//! span packets, and one packet may finish a section and start several
//! more. A continuity gap abandons the partial section.

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

use crate::filter::FilterParams;
use crate::section_builder::declared_section_len;

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Section header bytes needed to read `section_length`
const SECTION_HEADER_LEN: usize = 3;
const STUFFING_BYTE: u8 = 0xFF;

/// Counters kept by one assembler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub packets: u64,
    pub sections: u64,
    pub filtered: u64,
    pub dropped_packets: u64,
    pub abandoned_sections: u64,
}

/// Reassembles sections for one PID and table filter
#[derive(Debug)]
pub struct PacketAssembler {
    params: FilterParams,
    max_section_size: usize,
    buffer: Vec<u8>,
    expected_len: Option<usize>,
    collecting: bool,
    continuity: Option<u8>,
    stats: AssemblerStats,
}

impl PacketAssembler {
    pub fn new(params: &FilterParams, max_section_size: usize) -> Self {
        Self {
            params: *params,
            max_section_size,
            buffer: Vec::with_capacity(max_section_size),
            expected_len: None,
            collecting: false,
            continuity: None,
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Forget any partial section and the continuity history
    pub fn reset(&mut self) {
        self.abandon();
        self.continuity = None;
    }

    /// Feed one packet, calling `emit` for every matching section it completes
    ///
    /// Returns the number of sections emitted.
    pub fn push_packet<F>(&mut self, packet: &[u8], mut emit: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        if packet.len() != TS_PACKET_SIZE || packet[0] != TS_SYNC_BYTE {
            self.stats.dropped_packets += 1;
            return 0;
        }

        let pid = BigEndian::read_u16(&packet[1..3]) & 0x1FFF;
        if pid != self.params.pid {
            return 0;
        }
        self.stats.packets += 1;

        let transport_error = packet[1] & 0x80 != 0;
        let unit_start = packet[1] & 0x40 != 0;
        let scrambled = packet[3] >> 6 != 0;
        let adaptation_control = (packet[3] >> 4) & 0x03;
        let continuity = packet[3] & 0x0F;

        if transport_error || scrambled {
            trace!("[TS-ASSEMBLER] dropping packet on pid 0x{:04X}", pid);
            self.stats.dropped_packets += 1;
            self.abandon();
            return 0;
        }

        // Reserved, or adaptation field only; neither carries payload or advances the counter
        if adaptation_control == 0 || adaptation_control == 2 {
            return 0;
        }

        if let Some(previous) = self.continuity {
            if continuity == previous {
                trace!("[TS-ASSEMBLER] duplicate packet cc={}", continuity);
                return 0;
            }
            if continuity != (previous + 1) & 0x0F {
                debug!(
                    "[TS-ASSEMBLER] continuity gap on pid 0x{:04X}: {} -> {}",
                    pid, previous, continuity
                );
                self.abandon();
            }
        }
        self.continuity = Some(continuity);

        let mut offset = 4;
        if adaptation_control == 3 {
            offset += 1 + packet[4] as usize;
            if offset >= TS_PACKET_SIZE {
                self.stats.dropped_packets += 1;
                return 0;
            }
        }
        let payload = &packet[offset..];

        if !unit_start {
            return if self.collecting {
                self.absorb(payload, &mut emit)
            } else {
                0
            };
        }

        let pointer = payload[0] as usize;
        let rest = &payload[1..];
        if pointer > rest.len() {
            self.stats.dropped_packets += 1;
            self.abandon();
            return 0;
        }

        let mut emitted = 0;
        if self.collecting {
            emitted += self.absorb(&rest[..pointer], &mut emit);
            if self.collecting {
                // The previous section should have ended before the pointer
                self.abandon();
            }
        }

        let tail = &rest[pointer..];
        if tail.first().is_some_and(|b| *b != STUFFING_BYTE) {
            self.collecting = true;
            emitted += self.absorb(tail, &mut emit);
        }
        emitted
    }

    fn absorb<F>(&mut self, mut data: &[u8], emit: &mut F) -> usize
    where
        F: FnMut(&[u8]),
    {
        let mut emitted = 0;
        while self.collecting {
            let target = self.expected_len.unwrap_or(SECTION_HEADER_LEN);
            let take = (target - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() < target {
                break;
            }

            if self.expected_len.is_none() {
                match declared_section_len(&self.buffer) {
                    Some(len) if len <= self.max_section_size => self.expected_len = Some(len),
                    _ => {
                        debug!(
                            "[TS-ASSEMBLER] section header declares more than {} bytes",
                            self.max_section_size
                        );
                        self.abandon();
                        break;
                    }
                }
                continue;
            }

            if self.params.matches_section(&self.buffer) {
                emit(&self.buffer);
                emitted += 1;
                self.stats.sections += 1;
            } else {
                self.stats.filtered += 1;
            }
            self.buffer.clear();
            self.expected_len = None;

            // Another section may follow directly unless the rest is stuffing
            self.collecting = data.first().is_some_and(|b| *b != STUFFING_BYTE);
        }
        emitted
    }

    fn abandon(&mut self) {
        if self.collecting && !self.buffer.is_empty() {
            self.stats.abandoned_sections += 1;
        }
        self.collecting = false;
        self.buffer.clear();
        self.expected_len = None;
    }
}

/// Split a section stream into packets on `pid`
///
/// The first packet carries the unit start flag and a zero pointer field.
/// `cc` is the continuity counter for the next packet and is advanced past
/// the last one written. Unused payload bytes are stuffing.
pub fn packetize(pid: u16, data: &[u8], cc: &mut u8) -> Vec<[u8; TS_PACKET_SIZE]> {
    let mut packets = Vec::new();
    let mut remaining = data;
    let mut first = true;
    while first || !remaining.is_empty() {
        let mut packet = [STUFFING_BYTE; TS_PACKET_SIZE];
        packet[0] = TS_SYNC_BYTE;
        BigEndian::write_u16(&mut packet[1..3], pid & 0x1FFF);
        if first {
            packet[1] |= 0x40;
        }
        packet[3] = 0x10 | (*cc & 0x0F);
        *cc = (*cc + 1) & 0x0F;

        let mut offset = 4;
        if first {
            packet[4] = 0;
            offset = 5;
        }
        let take = remaining.len().min(TS_PACKET_SIZE - offset);
        packet[offset..offset + take].copy_from_slice(&remaining[..take]);
        remaining = &remaining[take..];
        first = false;
        packets.push(packet);
    }
    packets
}
