// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transport stream file playback
//!
//! Reads 188-byte packets from a capture file and reassembles sections on
//! the filtered PID. The threaded producer paces itself to the configured
//! bitrate in 100 ms ticks; the cooperative pump reads as fast as the
//! consumer's budget allows.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ota_config::TsFileConfig;
use ota_state_manager::{AgentStateManager, DiagnosticStats};

use super::producer_thread::{pause, ProducerThread};
use super::{Personality, PersonalityError, PersonalityResult, PumpFn};
use crate::delivery::SectionSink;
use crate::error::{SectionFilterError, SectionFilterResult};
use crate::filter::{FilterParams, ProducerModel};
use crate::packet_assembler::{PacketAssembler, TS_PACKET_SIZE, TS_SYNC_BYTE};
use crate::time::TimeoutBudget;
use crate::MAX_SECTION_SIZE;

const THREAD_NAME: &str = "ota-ts-file";
const TICK: Duration = Duration::from_millis(100);
const TICKS_PER_SECOND: u64 = 1_000 / 100;

/// Packets the threaded producer may read per 100 ms tick
fn packets_per_tick(bitrate_bps: u64) -> u64 {
    (bitrate_bps / 8 / TS_PACKET_SIZE as u64 / TICKS_PER_SECOND).max(1)
}

/// Sequential packet reader with optional looping and resync
pub struct TsPacketReader {
    path: PathBuf,
    file: BufReader<File>,
    loop_playback: bool,
    resync: bool,
    packet: [u8; TS_PACKET_SIZE],
    packets_in_pass: u64,
    passes: u32,
}

impl TsPacketReader {
    /// Open `path` and skip the first `packet_offset` packets
    pub fn open(path: &Path, packet_offset: u64, loop_playback: bool, resync: bool) -> io::Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        if packet_offset > 0 {
            file.seek(SeekFrom::Start(packet_offset * TS_PACKET_SIZE as u64))?;
            debug!("[TS-FILE] starting {} packets into {}", packet_offset, path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            loop_playback,
            resync,
            packet: [0u8; TS_PACKET_SIZE],
            packets_in_pass: 0,
            passes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Completed passes over the file
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Next packet, or `None` at end of stream
    ///
    /// With looping on, end of file rewinds once per call; a file with no
    /// whole packet in it still ends the stream.
    pub fn next_packet(&mut self) -> io::Result<Option<&[u8; TS_PACKET_SIZE]>> {
        let mut rewound = false;
        let mut slid = 0u64;
        loop {
            if !self.read_packet()? {
                self.passes += 1;
                info!(
                    "[TS-FILE] end of {} after {} packets",
                    self.path.display(),
                    self.packets_in_pass
                );
                if !self.loop_playback || rewound {
                    return Ok(None);
                }
                self.file.seek(SeekFrom::Start(0))?;
                self.packets_in_pass = 0;
                rewound = true;
                continue;
            }

            if self.resync && self.packet[0] != TS_SYNC_BYTE {
                if slid == 0 {
                    info!(
                        "[TS-FILE] lost sync after {} packets, resyncing",
                        self.packets_in_pass
                    );
                }
                // Retry one byte further on
                self.file.seek_relative(1 - TS_PACKET_SIZE as i64)?;
                slid += 1;
                continue;
            }
            if slid > 0 {
                info!("[TS-FILE] sync recovered after skipping {} bytes", slid);
            }

            self.packets_in_pass += 1;
            return Ok(Some(&self.packet));
        }
    }

    fn read_packet(&mut self) -> io::Result<bool> {
        match self.file.read_exact(&mut self.packet) {
            Ok(()) => Ok(true),
            // A trailing partial packet counts as end of file
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TsPacketReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsPacketReader")
            .field("path", &self.path)
            .field("loop_playback", &self.loop_playback)
            .field("resync", &self.resync)
            .field("passes", &self.passes)
            .finish()
    }
}

#[derive(Debug, Default)]
struct PlaybackState {
    reader: Option<TsPacketReader>,
    assembler: Option<PacketAssembler>,
    open: bool,
    opened_at: Option<Instant>,
    open_time: Duration,
    packets_read: u64,
}

impl PlaybackState {
    /// Read one packet into the assembler; false at end of stream
    fn feed(&mut self, sink: &SectionSink) -> PersonalityResult<bool> {
        let (reader, assembler) = match (self.reader.as_mut(), self.assembler.as_mut()) {
            (Some(reader), Some(assembler)) => (reader, assembler),
            _ => return Err(PersonalityError::NotOpen),
        };
        match reader.next_packet()? {
            Some(packet) => {
                assembler.push_packet(packet, |section| {
                    let _ = sink.deliver(section);
                });
                self.packets_read += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Backend that plays sections out of a transport stream capture
pub struct TsFileSource {
    config: TsFileConfig,
    model: ProducerModel,
    close_timeout: Duration,
    max_section_size: usize,
    agent: Arc<AgentStateManager>,
    stats: Arc<DiagnosticStats>,
    state: Arc<Mutex<PlaybackState>>,
    sink: Option<SectionSink>,
    thread: Option<ProducerThread>,
}

impl TsFileSource {
    pub fn new(
        config: TsFileConfig,
        model: ProducerModel,
        agent: Arc<AgentStateManager>,
        stats: Arc<DiagnosticStats>,
    ) -> Self {
        Self {
            config,
            model,
            close_timeout: Duration::from_millis(3_000),
            max_section_size: MAX_SECTION_SIZE,
            agent,
            stats,
            state: Arc::new(Mutex::new(PlaybackState::default())),
            sink: None,
            thread: None,
        }
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_max_section_size(mut self, max_section_size: usize) -> Self {
        self.max_section_size = max_section_size;
        self
    }

    /// Packets read since `create_section_filter`
    pub fn packets_read(&self) -> u64 {
        self.state.lock().packets_read
    }

    fn make_pump(&self, sink: SectionSink) -> PumpFn {
        let state = self.state.clone();
        let agent = self.agent.clone();
        let stats = self.stats.clone();

        Box::new(move |budget: &mut TimeoutBudget| -> SectionFilterResult<()> {
            let before = sink.delivered_count();
            loop {
                let more = state.lock().feed(&sink)?;
                if more {
                    stats.record_packets(1);
                }
                if sink.delivered_count() > before {
                    return Ok(());
                }
                if !more {
                    budget.exhaust();
                    return Err(SectionFilterError::Timeout);
                }
                budget.charge();
                if budget.is_exhausted() {
                    return Err(SectionFilterError::Timeout);
                }
                if agent.is_aborting() {
                    return Err(SectionFilterError::Abort);
                }
            }
        })
    }

    fn spawn_producer(&mut self, sink: SectionSink) -> PersonalityResult<()> {
        let state = self.state.clone();
        let agent = self.agent.clone();
        let stats = self.stats.clone();
        let per_tick = packets_per_tick(self.config.bitrate_bps);

        let thread = ProducerThread::spawn(THREAD_NAME, move |running| {
            let mut packets = 0u64;
            let mut ticks = 0u64;
            while running.load(Ordering::Acquire) && !agent.is_aborting() {
                let fed = state.lock().feed(&sink);
                match fed {
                    Ok(true) => {
                        packets += 1;
                        stats.record_packets(1);
                    }
                    Ok(false) => {
                        info!("[TS-FILE] end of stream, producer stopping");
                        break;
                    }
                    Err(e) => {
                        warn!("[TS-FILE] read failed, producer stopping: {}", e);
                        break;
                    }
                }
                if ticks < packets / per_tick {
                    if !pause(&running, &agent, TICK) {
                        break;
                    }
                    ticks += 1;
                }
            }
            debug!("[TS-FILE] producer read {} packets in {} ticks", packets, ticks);
        })?;
        self.thread = Some(thread);
        Ok(())
    }
}

impl Personality for TsFileSource {
    fn name(&self) -> &str {
        "ts-file"
    }

    fn create_section_filter(&mut self, sink: SectionSink) -> PersonalityResult<Option<PumpFn>> {
        let reader = TsPacketReader::open(
            &self.config.path,
            self.config.packet_offset,
            self.config.loop_playback,
            self.config.resync,
        )
        .map_err(|e| {
            warn!(
                "[TS-FILE] {} could not be opened: {}",
                self.config.path.display(),
                e
            );
            PersonalityError::Io(e)
        })?;

        *self.state.lock() = PlaybackState {
            reader: Some(reader),
            ..PlaybackState::default()
        };
        self.sink = Some(sink.clone());
        info!(
            "[TS-FILE] playing {} at {} bps ({:?})",
            self.config.path.display(),
            self.config.bitrate_bps,
            self.model
        );

        Ok(match self.model {
            ProducerModel::Threaded => None,
            ProducerModel::Cooperative => Some(self.make_pump(sink)),
        })
    }

    fn open_section_filter(&mut self, params: &FilterParams) -> PersonalityResult<()> {
        {
            let mut state = self.state.lock();
            if state.open {
                return Err(PersonalityError::AlreadyOpen);
            }
            if state.reader.is_none() {
                return Err(PersonalityError::NotCreated);
            }
            state.assembler = Some(PacketAssembler::new(params, self.max_section_size));
            state.open = true;
            state.opened_at = Some(Instant::now());
        }

        if self.model == ProducerModel::Cooperative {
            return Ok(());
        }
        let sink = self.sink.clone().ok_or(PersonalityError::NotCreated)?;
        if let Err(e) = self.spawn_producer(sink) {
            let mut state = self.state.lock();
            state.open = false;
            state.assembler = None;
            return Err(e);
        }
        Ok(())
    }

    fn close_section_filter(&mut self) -> PersonalityResult<()> {
        // Stop the producer first so it is not holding the playback lock
        let stopped = match self.thread.take() {
            Some(mut thread) => thread.stop(self.close_timeout),
            None => Ok(()),
        };

        let mut state = self.state.lock();
        if let Some(opened_at) = state.opened_at.take() {
            state.open_time += opened_at.elapsed();
        }
        state.open = false;
        state.assembler = None;

        let millis = state.open_time.as_millis().max(1) as u64;
        let bitrate = state.packets_read * TS_PACKET_SIZE as u64 * 8 * 1_000 / millis;
        info!(
            "[TS-FILE] {} packets in {} ms, effective bitrate {} bps",
            state.packets_read, millis, bitrate
        );
        stopped
    }

    fn destroy_section_filter(&mut self) -> PersonalityResult<()> {
        *self.state.lock() = PlaybackState::default();
        self.sink = None;
        Ok(())
    }
}

impl std::fmt::Debug for TsFileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsFileSource")
            .field("path", &self.config.path)
            .field("bitrate_bps", &self.config.bitrate_bps)
            .field("model", &self.model)
            .finish()
    }
}
