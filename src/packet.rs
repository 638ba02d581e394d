//! The binary telemetry stream.
//!
//! A stream of variable-length, self-delimiting packets, all integers
//! little-endian. The stream opens with exactly one [`LogHeaderPacket`],
//! then one [`QueueInfoPacket`] per queue as it is first observed, then
//! [`SubmitPacket`] records in per-queue order. Range records trail their
//! submit: `range_count` unlabeled timers (plus statistics when enabled),
//! then `marker_count` labeled timers.
//!
//! [`PacketWriter`] owns every I/O sink: the staging buffer, the local log
//! file, and the HUD link. It is the single point through which bytes
//! leave the tap.

use std::fs::File;
use std::io::Write;

use crate::backend::PIPELINE_STAT_COUNT;
use crate::net::HudLink;
use crate::settings::CaptureMode;

/// First four bytes of every log and of every HUD handshake.
pub const LOG_HANDSHAKE: u32 = 0x5650_4831;

/// Bumped whenever the packet layout changes.
pub const LOG_VERSION: u32 = 3;

/// Discriminants of the self-delimiting packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    QueueInfo = 1,
    Submit = 2,
    RangeTimer = 3,
    RangeStats = 4,
}

/// 12-byte stream prologue; also replayed on each HUD connection.
#[derive(Debug, Clone, Copy)]
pub struct LogHeaderPacket {
    pub handshake: u32,
    pub version: u32,
    pub timestamp_period_nanos: f32,
}

impl LogHeaderPacket {
    pub const SIZE: usize = 12;

    pub fn new(timestamp_period_nanos: f32) -> Self {
        Self {
            handshake: LOG_HANDSHAKE,
            version: LOG_VERSION,
            timestamp_period_nanos,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.handshake.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.timestamp_period_nanos.to_le_bytes());
        bytes
    }
}

/// Announces a queue the first time the application retrieves it.
#[derive(Debug, Clone, Copy)]
pub struct QueueInfoPacket {
    pub queue_family_flags: u32,
    pub queue_index: u32,
    pub global_queue_index: u32,
    pub handle: u64,
}

impl QueueInfoPacket {
    pub const SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0..4].copy_from_slice(&(PacketType::QueueInfo as u32).to_le_bytes());
        bytes[4..8].copy_from_slice(&self.queue_family_flags.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.queue_index.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.global_queue_index.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.handle.to_le_bytes());
        bytes
    }
}

/// One captured submit; `range_count` + `marker_count` records follow.
#[derive(Debug, Clone, Copy)]
pub struct SubmitPacket {
    pub global_queue_index: u32,
    pub wall_micros: u64,
    pub present_only: bool,
    pub range_count: u16,
    pub marker_count: u16,
}

impl SubmitPacket {
    pub const SIZE: usize = 21;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0..4].copy_from_slice(&(PacketType::Submit as u32).to_le_bytes());
        bytes[4..8].copy_from_slice(&self.global_queue_index.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.wall_micros.to_le_bytes());
        bytes[16] = self.present_only as u8;
        bytes[17..19].copy_from_slice(&self.range_count.to_le_bytes());
        bytes[19..21].copy_from_slice(&self.marker_count.to_le_bytes());
        bytes
    }
}

/// Start/end timestamp pair of one range. Command-buffer outer ranges have
/// an empty label; marker labels are capped to 255 bytes.
#[derive(Debug, Clone)]
pub struct RangeTimerPacket<'a> {
    pub label: &'a str,
    pub timestamps: [u64; 2],
}

impl RangeTimerPacket<'_> {
    pub fn encode(&self) -> Vec<u8> {
        let label = &self.label.as_bytes()[..self.label.len().min(255)];

        let mut bytes = Vec::with_capacity(21 + label.len());
        bytes.extend_from_slice(&(PacketType::RangeTimer as u32).to_le_bytes());
        bytes.push(label.len() as u8);
        bytes.extend_from_slice(&self.timestamps[0].to_le_bytes());
        bytes.extend_from_slice(&self.timestamps[1].to_le_bytes());
        bytes.extend_from_slice(label);
        bytes
    }
}

/// Pipeline-statistics counters of one range.
#[derive(Debug, Clone, Copy)]
pub struct RangeStatsPacket {
    pub stats: [u64; PIPELINE_STAT_COUNT],
}

impl RangeStatsPacket {
    pub const SIZE: usize = 4 + 8 * PIPELINE_STAT_COUNT;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0..4].copy_from_slice(&(PacketType::RangeStats as u32).to_le_bytes());
        for (index, stat) in self.stats.iter().enumerate() {
            bytes[4 + index * 8..12 + index * 8].copy_from_slice(&stat.to_le_bytes());
        }
        bytes
    }
}

/// Size of the staging buffer packets accumulate in before a flush.
pub const STAGING_BUFFER_SIZE: usize = 1024;

/// Staging-buffered serializer fanning out to the local file and the HUD.
pub struct PacketWriter {
    staging: [u8; STAGING_BUFFER_SIZE],
    put: usize,

    file: Option<File>,
    capture_mode: CaptureMode,
    header: [u8; LogHeaderPacket::SIZE],
    hud: HudLink,
}

impl PacketWriter {
    pub fn new(
        file: Option<File>,
        capture_mode: CaptureMode,
        header: LogHeaderPacket,
        hud: HudLink,
    ) -> Self {
        Self {
            staging: [0; STAGING_BUFFER_SIZE],
            put: 0,
            file,
            capture_mode,
            header: header.encode(),
            hud,
        }
    }

    /// Appends bytes to the stream. Writes larger than half the staging
    /// buffer bypass it; smaller writes accumulate and flush once the
    /// cursor crosses the halfway mark.
    pub fn write_data(&mut self, bytes: &[u8]) {
        if bytes.len() > STAGING_BUFFER_SIZE / 2 {
            self.flush_staging();
            self.flush_to_output(bytes);
        } else {
            self.staging[self.put..self.put + bytes.len()].copy_from_slice(bytes);
            self.put += bytes.len();

            if self.put > STAGING_BUFFER_SIZE / 2 {
                self.flush_staging();
            }
        }
    }

    /// Drains the staging buffer through the sinks.
    pub fn flush_staging(&mut self) {
        if self.put > 0 {
            let put = std::mem::take(&mut self.put);
            let staged = self.staging;
            self.flush_to_output(&staged[..put]);
        }
    }

    fn flush_to_output(&mut self, bytes: &[u8]) {
        self.hud.transmit_capture(bytes);

        if self.capture_mode != CaptureMode::Network {
            if let Some(file) = &mut self.file {
                if let Err(err) = file.write_all(bytes).and_then(|()| file.flush()) {
                    log::error!("writing telemetry log failed: {err}");
                    self.file = None;
                }
            }
        }
    }

    /// Port the HUD listener bound, if one is open.
    pub fn hud_port(&self) -> Option<u16> {
        self.hud.local_port()
    }

    /// Accepts a pending live HUD connection, if any.
    pub fn poll_live_connection(&mut self) {
        self.hud.poll_live_connection(&self.header);
    }

    /// Accepts a pending capture request. On success the staging buffer is
    /// flushed so the capture starts clean, the header and all known queue
    /// descriptions are replayed, and the requested marker depth is
    /// returned for the caller to arm.
    pub fn poll_capture_request(&mut self, queue_info: &[QueueInfoPacket]) -> Option<u32> {
        let request = self.hud.poll_capture_request()?;
        self.flush_staging();

        let marker_depth = self.hud.arm_capture(request);
        let header = self.header;
        self.hud.transmit_capture(&header);
        for info in queue_info {
            self.hud.transmit_capture(&info.encode());
        }
        Some(marker_depth)
    }

    /// Post-capture poll for the client's completion acknowledgement.
    pub fn service_capture_socket(&mut self) {
        self.hud.poll_capture_completion();
    }

    /// Sends a completed frametime to the live HUD client and counts the
    /// frame against an active capture. Returns true when this frame was
    /// the final one of the capture (the caller disables markers).
    pub fn frametime_completed(&mut self, end_timestamp: u64) -> bool {
        self.hud.send_frametime(end_timestamp);

        if self.hud.capture_on_final_frame() {
            // The captured log must end clean before the completion marker.
            self.flush_staging();
            self.hud.finish_capture();
            true
        } else {
            self.hud.count_captured_frame();
            false
        }
    }
}
