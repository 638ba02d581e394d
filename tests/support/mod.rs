//! Shared test plumbing: a deterministic mock of the GPU backend, an
//! engine harness writing to a throwaway log file, and a decoder for the
//! binary stream the tests assert against.

// Not every test crate uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use gpu_voyeur::{
    CaptureMode, CommandBuffer, DeviceDescription, GpuVoyeur, LayerSettings, PipelineStage,
    QueryBackend, QueryPoll, QueueFamilyProperties, QueueFlags, LOG_HANDSHAKE,
    PIPELINE_STAT_COUNT,
};

pub const SETUP_CB: CommandBuffer = CommandBuffer(u64::MAX);

/// Backend that "executes" every encoded command immediately: each
/// timestamp write is assigned the next value of a monotonic counter, so
/// results are available as soon as the command buffer is recorded
/// (unless a test holds them back).
#[derive(Default)]
pub struct MockBackend {
    clock: AtomicU64,
    timer_values: Mutex<HashMap<u32, u64>>,
    /// (cb, stage, query index) of every timestamp write, in encode order.
    pub timestamp_writes: Mutex<Vec<(CommandBuffer, PipelineStage, u32)>>,
    /// (first, count) of every timer-pool reset encoded.
    pub timer_resets: Mutex<Vec<(u32, u32)>>,
    hold_results: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: AtomicU64::new(1000),
            ..Self::default()
        })
    }

    /// While held, every result fetch reports not-ready.
    pub fn set_hold_results(&self, hold: bool) {
        self.hold_results.store(hold, Ordering::Relaxed);
    }

    pub fn timestamp_write_count(&self, cb: CommandBuffer) -> usize {
        self.timestamp_writes
            .lock()
            .iter()
            .filter(|(writer, _, _)| *writer == cb)
            .count()
    }
}

impl QueryBackend for MockBackend {
    fn write_timestamp(&self, cb: CommandBuffer, stage: PipelineStage, query_index: u32) {
        let value = self.clock.fetch_add(100, Ordering::Relaxed);
        self.timer_values.lock().insert(query_index, value);
        self.timestamp_writes.lock().push((cb, stage, query_index));
    }

    fn begin_stats_query(&self, _cb: CommandBuffer, _slot_index: u32) {}

    fn end_stats_query(&self, _cb: CommandBuffer, _slot_index: u32) {}

    fn reset_timer_queries(&self, _cb: CommandBuffer, first_query: u32, query_count: u32) {
        let mut values = self.timer_values.lock();
        for query in first_query..first_query + query_count {
            values.remove(&query);
        }
        self.timer_resets.lock().push((first_query, query_count));
    }

    fn reset_stats_queries(&self, _cb: CommandBuffer, _first_query: u32, _query_count: u32) {}

    fn fetch_timer_results(&self, first_query: u32, out: &mut [u64]) -> QueryPoll {
        if self.hold_results.load(Ordering::Relaxed) {
            return QueryPoll::NotReady;
        }
        let values = self.timer_values.lock();
        for (offset, result) in out.iter_mut().enumerate() {
            match values.get(&(first_query + offset as u32)) {
                Some(&value) => *result = value,
                None => return QueryPoll::NotReady,
            }
        }
        QueryPoll::Ready
    }

    fn fetch_stats_results(&self, slot_index: u32, out: &mut [u64; PIPELINE_STAT_COUNT]) -> QueryPoll {
        if self.hold_results.load(Ordering::Relaxed) {
            return QueryPoll::NotReady;
        }
        for (counter, result) in out.iter_mut().enumerate() {
            *result = u64::from(slot_index) * 100 + counter as u64;
        }
        QueryPoll::Ready
    }

    fn begin_setup_commands(&self) -> Option<CommandBuffer> {
        Some(SETUP_CB)
    }

    fn submit_setup_commands(&self, _cb: CommandBuffer) -> bool {
        true
    }

    fn setup_fence_signaled(&self) -> bool {
        true
    }
}

/// Families: 0 = graphics+compute with timestamps, 1 = compute with
/// timestamps, 2 = transfer without timestamps.
pub fn test_queue_families() -> Vec<QueueFamilyProperties> {
    vec![
        QueueFamilyProperties {
            flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE,
            timestamp_valid_bits: 64,
        },
        QueueFamilyProperties {
            flags: QueueFlags::COMPUTE,
            timestamp_valid_bits: 64,
        },
        QueueFamilyProperties {
            flags: QueueFlags::TRANSFER,
            timestamp_valid_bits: 0,
        },
    ]
}

static LOG_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn temp_log_path(tag: &str) -> PathBuf {
    let unique = LOG_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "gpu-voyeur-{tag}-{}-{unique}.log",
        std::process::id()
    ))
}

pub struct Harness {
    pub voyeur: GpuVoyeur,
    pub backend: Arc<MockBackend>,
    log_path: PathBuf,
}

impl Harness {
    /// Engine with a file sink only (no listener, no port collisions).
    pub fn new(tag: &str, pipeline_stats_enabled: bool) -> Self {
        Self::with_settings(tag, pipeline_stats_enabled, CaptureMode::Local, 0)
    }

    pub fn with_settings(
        tag: &str,
        pipeline_stats_enabled: bool,
        capture_mode: CaptureMode,
        port: u16,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let log_path = temp_log_path(tag);
        let settings = LayerSettings {
            output_path: log_path.to_string_lossy().into_owned(),
            logger_thread: false,
            port,
            capture_mode,
        };
        let device = DeviceDescription {
            queue_families: test_queue_families(),
            timestamp_period_nanos: 1.0,
            pipeline_stats_enabled,
        };
        let backend = MockBackend::new();
        let voyeur = GpuVoyeur::new(backend.clone(), device, settings);
        Self {
            voyeur,
            backend,
            log_path,
        }
    }

    /// Shuts the engine down (flushing the staging buffer) and decodes
    /// the log file.
    pub fn finish(self) -> Vec<Packet> {
        drop(self.voyeur);
        let bytes = std::fs::read(&self.log_path).expect("telemetry log missing");
        let _ = std::fs::remove_file(&self.log_path);
        parse_stream(&bytes)
    }
}

/// Decoded form of the positional packet stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    LogHeader {
        handshake: u32,
        version: u32,
        timestamp_period_nanos: f32,
    },
    QueueInfo {
        queue_family_flags: u32,
        queue_index: u32,
        global_queue_index: u32,
        handle: u64,
    },
    Submit {
        global_queue_index: u32,
        wall_micros: u64,
        present_only: bool,
        range_count: u16,
        marker_count: u16,
    },
    RangeTimer {
        label: String,
        timestamps: [u64; 2],
    },
    RangeStats {
        stats: [u64; PIPELINE_STAT_COUNT],
    },
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> u8 {
        let value = self.bytes[self.at];
        self.at += 1;
        value
    }

    fn u16(&mut self) -> u16 {
        let value = u16::from_le_bytes(self.bytes[self.at..self.at + 2].try_into().unwrap());
        self.at += 2;
        value
    }

    fn u32(&mut self) -> u32 {
        let value = u32::from_le_bytes(self.bytes[self.at..self.at + 4].try_into().unwrap());
        self.at += 4;
        value
    }

    fn u64(&mut self) -> u64 {
        let value = u64::from_le_bytes(self.bytes[self.at..self.at + 8].try_into().unwrap());
        self.at += 8;
        value
    }

    fn f32(&mut self) -> f32 {
        let value = f32::from_le_bytes(self.bytes[self.at..self.at + 4].try_into().unwrap());
        self.at += 4;
        value
    }

    fn label(&mut self, length: usize) -> String {
        let text = String::from_utf8_lossy(&self.bytes[self.at..self.at + length]).into_owned();
        self.at += length;
        text
    }
}

/// Decodes a full stream, header first.
pub fn parse_stream(bytes: &[u8]) -> Vec<Packet> {
    let mut reader = Reader { bytes, at: 0 };
    let mut packets = Vec::new();

    let handshake = reader.u32();
    assert_eq!(handshake, LOG_HANDSHAKE, "stream does not start with the header");
    packets.push(Packet::LogHeader {
        handshake,
        version: reader.u32(),
        timestamp_period_nanos: reader.f32(),
    });

    while reader.at < bytes.len() {
        let packet_type = reader.u32();
        packets.push(match packet_type {
            1 => Packet::QueueInfo {
                queue_family_flags: reader.u32(),
                queue_index: reader.u32(),
                global_queue_index: reader.u32(),
                handle: reader.u64(),
            },
            2 => Packet::Submit {
                global_queue_index: reader.u32(),
                wall_micros: reader.u64(),
                present_only: reader.u8() != 0,
                range_count: reader.u16(),
                marker_count: reader.u16(),
            },
            3 => {
                let label_length = reader.u8() as usize;
                let timestamps = [reader.u64(), reader.u64()];
                Packet::RangeTimer {
                    label: reader.label(label_length),
                    timestamps,
                }
            }
            4 => {
                let mut stats = [0u64; PIPELINE_STAT_COUNT];
                for stat in &mut stats {
                    *stat = reader.u64();
                }
                Packet::RangeStats { stats }
            }
            other => panic!("unknown packet type {other} at offset {}", reader.at - 4),
        });
    }

    packets
}

/// All `Submit` packets of a stream, in stream order.
pub fn submits(packets: &[Packet]) -> Vec<&Packet> {
    packets
        .iter()
        .filter(|packet| matches!(packet, Packet::Submit { .. }))
        .collect()
}
