/*!

Telemetry tap for a command-pool/command-buffer/queue style GPU API.

`gpu_voyeur` sits behind an interception layer and turns the application's
command-stream traffic into a time-ordered binary telemetry stream: one
timestamp range per command buffer, optional pipeline statistics, nested
debug-marker ranges, queue submissions and per-present frametimes. The
stream goes to a local log file and/or to a HUD client over TCP.

The layer glue forwards its intercepted calls into the matching hooks on
[`GpuVoyeur`] and gives the tap GPU access through the [`QueryBackend`]
trait:

```ignore
let voyeur = GpuVoyeur::new(backend, device_description, LayerSettings::load());

// from the intercepted API entry points:
voyeur.command_pool_created(pool, queue_family_index);
voyeur.command_buffers_allocated(pool, &command_buffers);
voyeur.begin_command_buffer(cb);
voyeur.begin_marker(cb, "shadow pass");
voyeur.end_marker(cb);
voyeur.end_command_buffer(cb);
voyeur.queue_submit(queue, &[&[cb]]);
voyeur.queue_present(queue, image_index);
```

Every hook takes `&self`, may be called from any thread, and never
reports a failure to the host: telemetry trouble degrades to gaps in the
stream, not to broken rendering.

# Internals

The heart of the tap is a fixed pool of logical *query slots*
([`QuerySlotManager`]), each backing a start/end pair in the physical
timer query pool. A slot cycles through five states spanning CPU
recording, GPU execution, result readback and GPU-side reset; the cycle
guarantees a slot's reset command always executes at least one observed
submit before its next timestamp write.

Recording-time bookkeeping ([`RecordingTracker`]) binds slots to command
buffers; at submit time everything is moved into a [`TrackedSubmit`]
because command-buffer handles cannot be trusted afterwards. Each present
polls the oldest submit of every queue (non-blocking), serializes the
finished ones through the staging-buffered [`PacketWriter`], recycles
their slots, and correlates presents with submits to estimate frametimes
for the live HUD connection.
*/

mod completion;

pub mod backend;
pub mod command_tracker;
pub mod errors;
pub mod handles;
pub mod markers;
pub mod net;
pub mod output;
pub mod packet;
pub mod queue_family;
pub mod recording;
pub mod settings;
pub mod slots;
pub mod submit;
pub mod worker;

pub use backend::{PipelineStage, QueryBackend, QueryPoll, PIPELINE_STAT_COUNT};
pub use errors::SettingsError;
pub use handles::{CommandBuffer, CommandPool, Queue};
pub use markers::{MarkerRange, MarkerStack};
pub use packet::{
    LogHeaderPacket, PacketType, PacketWriter, QueueInfoPacket, RangeStatsPacket, RangeTimerPacket,
    SubmitPacket, LOG_HANDSHAKE, LOG_VERSION,
};
pub use queue_family::{QueueFamilyInfo, QueueFamilyProperties, QueueFlags};
pub use recording::RecordingTracker;
pub use settings::{CaptureMode, LayerSettings};
pub use slots::{
    PendingResets, QuerySlotManager, Slot, SlotState, NUM_QUERY_SLOTS, NUM_STAT_QUERIES,
    NUM_TIMER_QUERIES,
};
pub use submit::{FrametimeBridge, QueueRegistry, SubmitTracker, TrackedSubmit};

// ---------------

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::command_tracker::CommandPoolTracker;
use crate::net::HudLink;
use crate::packet::LogHeaderPacket as Header;
use crate::worker::LogWriterThread;

/// Device facts the tap needs at creation, gathered by the layer glue.
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    pub queue_families: Vec<QueueFamilyProperties>,
    /// Nanoseconds per timestamp tick, reported in the stream header.
    pub timestamp_period_nanos: f32,
    /// Whether the backend created a pipeline-statistics query pool.
    pub pipeline_stats_enabled: bool,
}

/// The telemetry engine. One instance per logical device.
pub struct GpuVoyeur {
    backend: Arc<dyn QueryBackend>,
    stats_enabled: bool,
    start_time: Instant,

    queue_families: QueueFamilyInfo,

    /// Pools whose queue family may carry query-pool reset commands.
    reset_pools: CommandPoolTracker,
    /// Pools whose queue family may record timestamps.
    timestamp_pools: CommandPoolTracker,

    slots: QuerySlotManager,
    pending_resets: PendingResets,

    recording: RecordingTracker,
    /// Marker nesting cap, settable at runtime by a capture request.
    /// 0 disables marker tracking for subsequently begun command buffers.
    max_marker_depth: AtomicU32,

    submits: SubmitTracker,
    queues: QueueRegistry,
    frametime: FrametimeBridge,

    writer: Mutex<PacketWriter>,

    present_count: AtomicU64,
    log_writer: Option<LogWriterThread>,
}

// Public interface
impl GpuVoyeur {
    /// Creates the engine for a freshly created device.
    ///
    /// Opens the output sinks, writes the stream header, and performs the
    /// one-time blocking clear of both query pools (the only intentional
    /// blocking wait in the tap).
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        device: DeviceDescription,
        settings: LayerSettings,
    ) -> Self {
        let output_path = output::resolve_output_path(&settings);
        if let Some(path) = &output_path {
            output::install_debug_logger(path);
        }
        let file = output_path
            .as_ref()
            .and_then(|path| output::open_log_file(path, settings.capture_mode));

        let header = Header::new(device.timestamp_period_nanos);
        let hud = HudLink::new(settings.port, settings.capture_mode);
        let mut writer = PacketWriter::new(file, settings.capture_mode, header, hud);
        writer.write_data(&header.encode());

        let voyeur = Self {
            backend,
            stats_enabled: device.pipeline_stats_enabled,
            start_time: Instant::now(),
            queue_families: QueueFamilyInfo::new(device.queue_families),
            reset_pools: CommandPoolTracker::default(),
            timestamp_pools: CommandPoolTracker::default(),
            slots: QuerySlotManager::new(),
            pending_resets: PendingResets::default(),
            recording: RecordingTracker::default(),
            max_marker_depth: AtomicU32::new(0),
            submits: SubmitTracker::default(),
            queues: QueueRegistry::default(),
            frametime: FrametimeBridge::default(),
            writer: Mutex::new(writer),
            present_count: AtomicU64::new(0),
            log_writer: settings.logger_thread.then(LogWriterThread::spawn),
        };

        voyeur.run_setup_reset();
        voyeur
    }

    /// Tracks a new command pool under the trackers its queue family
    /// qualifies for.
    pub fn command_pool_created(&self, pool: CommandPool, queue_family_index: u32) {
        if self.queue_families.supports_reset_submission(queue_family_index) {
            self.reset_pools.add_pool(pool);
        }
        if self.queue_families.supports_timestamps(queue_family_index) {
            self.timestamp_pools.add_pool(pool);
        }
    }

    /// Rolls back every recording the pool still owns and forgets it.
    pub fn command_pool_destroyed(&self, pool: CommandPool) {
        self.rollback_pool_recordings(pool);
        self.reset_pools.remove_pool(pool);
        self.timestamp_pools.remove_pool(pool);
    }

    /// Cascaded reset: every command buffer of the pool returns to the
    /// initial state, but stays allocated.
    pub fn command_pool_reset(&self, pool: CommandPool) {
        self.rollback_pool_recordings(pool);
    }

    pub fn command_buffers_allocated(&self, pool: CommandPool, handles: &[CommandBuffer]) {
        self.reset_pools.add_command_buffers(pool, handles);
        self.timestamp_pools.add_command_buffers(pool, handles);
    }

    pub fn command_buffers_freed(&self, pool: CommandPool, handles: &[CommandBuffer]) {
        for &cb in handles {
            self.rollback_command_buffer(cb);
        }
        self.reset_pools.remove_command_buffers(pool, handles);
        self.timestamp_pools.remove_command_buffers(pool, handles);
    }

    /// Start of recording: adopt any pending query-pool resets if this
    /// command buffer may carry them, then open the outer timestamp range.
    pub fn begin_command_buffer(&self, cb: CommandBuffer) {
        // A begin on a still-tracked handle is an implicit reset.
        self.rollback_command_buffer(cb);

        if self.reset_pools.is_tracked(cb) {
            if let Some(claimed) = self.pending_resets.try_claim() {
                for slot in &claimed {
                    self.backend.reset_timer_queries(cb, slot.timer_start(), 2);
                    if self.stats_enabled {
                        self.backend.reset_stats_queries(cb, slot.stats_index(), 1);
                    }
                }
                self.slots.transition(&claimed, SlotState::ResetPendingOnGPU);
                self.recording.add_reset_slots(cb, claimed);
            }
        }

        if self.timestamp_pools.is_tracked(cb) {
            let depth_cap = self.max_marker_depth.load(Ordering::Relaxed);
            self.recording.create_marker_state(cb, depth_cap);

            if let Some(slot) = self.issue_range_start(cb) {
                self.recording.bind_outer(cb, slot);
            }
        }
    }

    /// End of recording: close any marker ranges the application left
    /// open, then write the outer end timestamp after them.
    pub fn end_command_buffer(&self, cb: CommandBuffer) {
        if let Some(markers) = self.recording.marker_state(cb) {
            let unended = markers.lock().flush_open();
            for slot in unended {
                self.emit_range_end(cb, slot);
            }
        }

        if let Some(slot) = self.recording.outer(cb) {
            self.emit_range_end(cb, slot);
        }
    }

    /// The recording is discarded; every slot it held goes back. A no-op
    /// for an untracked handle, so resetting twice is harmless.
    pub fn reset_command_buffer(&self, cb: CommandBuffer) {
        self.rollback_command_buffer(cb);
    }

    /// Opens a nested debug-marker range. Past the depth cap, or when no
    /// slot is free, a placeholder keeps the nesting balanced.
    pub fn begin_marker(&self, cb: CommandBuffer, label: &str) {
        let Some(markers) = self.recording.marker_state(cb) else {
            return;
        };
        let (depth, depth_cap) = {
            let stack = markers.lock();
            (stack.depth(), stack.depth_cap())
        };
        if depth_cap == 0 {
            return;
        }

        let slot = if depth < depth_cap {
            self.slots.acquire()
        } else {
            None
        };

        match slot {
            Some(slot) => {
                self.emit_range_start(cb, slot);
                markers.lock().push(label.to_owned(), Some(slot));
            }
            None => markers.lock().push(String::new(), None),
        }
    }

    /// Closes the innermost open marker range.
    pub fn end_marker(&self, cb: CommandBuffer) {
        let Some(markers) = self.recording.marker_state(cb) else {
            return;
        };
        let popped = markers.lock().pop();
        if let Some(Some(slot)) = popped {
            self.emit_range_end(cb, slot);
        }
    }

    /// Announces a queue the first time the application retrieves it.
    pub fn device_queue_obtained(&self, queue: Queue, queue_family_index: u32, queue_index: u32) {
        let flags = self.queue_families.flags(queue_family_index);
        if let Some(packet) = self.queues.observe(queue, flags.bits(), queue_index) {
            self.writer.lock().write_data(&packet.encode());
        }
    }

    /// Captures the provenance of each submit, moving slot bindings and
    /// closed markers out of the recording state synchronously with the
    /// host call.
    pub fn queue_submit(&self, queue: Queue, submits: &[&[CommandBuffer]]) {
        for command_buffers in submits {
            let mut tracked = TrackedSubmit::new(queue, self.wall_micros(), false);

            for &cb in *command_buffers {
                if let Some(slot) = self.recording.take_outer(cb) {
                    tracked.cb_outer_slots.push(slot);
                }
                tracked.reset_slots.extend(self.recording.take_reset_slots(cb));
                if let Some(markers) = self.recording.marker_state(cb) {
                    tracked.markers.extend(markers.lock().drain_closed());
                }
            }

            if let Some(slot) = tracked.terminal_slot() {
                self.frametime.note_submit(queue, slot);
            }
            self.submits.append(tracked);
        }
    }

    /// A present: services the HUD sockets, appends the present-only
    /// sentinel submit, and runs the completion pass.
    pub fn queue_present(&self, queue: Queue, present_index: u32) {
        let presents = self.present_count.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "present #{presents} (image {present_index}) on queue {:#x}",
            queue.0
        );

        {
            let mut writer = self.writer.lock();
            writer.poll_live_connection();
            let cached = self.queues.cached_info();
            if let Some(marker_depth) = writer.poll_capture_request(&cached) {
                self.max_marker_depth.store(marker_depth, Ordering::Relaxed);
            }
            writer.service_capture_socket();
        }

        self.submits
            .append(TrackedSubmit::new(queue, self.wall_micros(), true));
        self.frametime.note_present(queue);

        self.process_completed_submits();
    }

    /// Caps marker nesting for command buffers begun from now on.
    /// 0 disables markers. Normally driven by capture requests.
    pub fn set_max_marker_depth(&self, depth: u32) {
        self.max_marker_depth.store(depth, Ordering::Relaxed);
    }

    /// Port the HUD listener bound, if one is open.
    pub fn listener_port(&self) -> Option<u16> {
        self.writer.lock().hud_port()
    }

    /// Diagnostic: slots currently ready for a new query.
    pub fn free_slot_count(&self) -> u32 {
        self.slots.free_slots()
    }

    /// Diagnostic: slots somewhere between acquisition and recycling.
    pub fn active_slot_count(&self) -> u32 {
        self.slots.active_slots()
    }
}

// --------------------------------------------------------------------------------
// Internals
// --------------------------------------------------------------------------------

impl GpuVoyeur {
    /// One-time clear of both physical pools through a setup command
    /// buffer, spinning on the fence until the device is done.
    fn run_setup_reset(&self) {
        let Some(cb) = self.backend.begin_setup_commands() else {
            log::warn!("no setup command buffer; assuming query pools start reset");
            return;
        };

        self.backend.reset_timer_queries(cb, 0, NUM_TIMER_QUERIES);
        if self.stats_enabled {
            self.backend.reset_stats_queries(cb, 0, NUM_STAT_QUERIES);
        }

        if self.backend.submit_setup_commands(cb) {
            while !self.backend.setup_fence_signaled() {
                std::hint::spin_loop();
            }
        }
        log::info!("query pools cleared");
    }

    fn wall_micros(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Acquires a slot and writes its range-start timestamp (plus the
    /// statistics-query begin). `None` under slot exhaustion: the range
    /// simply goes untracked.
    fn issue_range_start(&self, cb: CommandBuffer) -> Option<Slot> {
        let slot = self.slots.acquire()?;
        self.emit_range_start(cb, slot);
        Some(slot)
    }

    fn emit_range_start(&self, cb: CommandBuffer, slot: Slot) {
        self.backend
            .write_timestamp(cb, PipelineStage::BottomOfPipe, slot.timer_start());
        if self.stats_enabled {
            self.backend.begin_stats_query(cb, slot.stats_index());
        }
    }

    fn emit_range_end(&self, cb: CommandBuffer, slot: Slot) {
        self.backend
            .write_timestamp(cb, PipelineStage::BottomOfPipe, slot.timer_end());
        if self.stats_enabled {
            self.backend.end_stats_query(cb, slot.stats_index());
        }
    }

    /// Backs every slot the command buffer holds out of its recording:
    /// carried resets re-enter the pending list, the outer range and
    /// marker ranges return to the free pool.
    fn rollback_command_buffer(&self, cb: CommandBuffer) {
        let reset_slots = self.recording.take_reset_slots(cb);
        if !reset_slots.is_empty() {
            self.slots
                .rollback(&reset_slots, SlotState::ReadyForResetIssue);
            self.pending_resets.enqueue(&reset_slots);
        }

        if let Some(outer) = self.recording.take_outer(cb) {
            self.slots.rollback(&[outer], SlotState::ReadyForQueryIssue);
        }

        if let Some(markers) = self.recording.remove_marker_state(cb) {
            let marker_slots = markers.lock().take_all_slots();
            if !marker_slots.is_empty() {
                self.slots
                    .rollback(&marker_slots, SlotState::ReadyForQueryIssue);
            }
        }
    }

    fn rollback_pool_recordings(&self, pool: CommandPool) {
        for cb in self.reset_pools.command_buffers_in(pool) {
            self.rollback_command_buffer(cb);
        }
        for cb in self.timestamp_pools.command_buffers_in(pool) {
            self.rollback_command_buffer(cb);
        }
    }
}

impl Drop for GpuVoyeur {
    fn drop(&mut self) {
        if let Some(worker) = &mut self.log_writer {
            worker.stop();
        }

        let mut writer = self.writer.lock();
        writer.flush_staging();

        log::info!(
            "shutting down after {} presents ({} slots free, {} in flight)",
            self.present_count.load(Ordering::Relaxed),
            self.slots.free_slots(),
            self.slots.active_slots(),
        );
    }
}
