//! The completion pass: polls in-flight submits, serializes the finished
//! ones, recycles their slots and emits frametimes.
//!
//! Runs synchronously at each present. Nothing here blocks: the poll uses
//! the non-blocking result query, and a submit whose terminal timestamp
//! is not ready simply stays queued for the next pass.

use crate::backend::PIPELINE_STAT_COUNT;
use crate::packet::{PacketWriter, RangeStatsPacket, RangeTimerPacket, SubmitPacket};
use crate::slots::{Slot, SlotState};
use crate::submit::TrackedSubmit;
use crate::GpuVoyeur;

use std::sync::atomic::Ordering;

impl GpuVoyeur {
    /// One full completion pass over every queue.
    pub fn process_completed_submits(&self) {
        // A submit is complete once the end timestamp of its last tracked
        // command buffer reads back; untracked and present-only submits
        // complete trivially.
        let completed = self.submits.drain_completed(|submit| {
            let Some(slot) = submit.terminal_slot() else {
                return true;
            };
            let mut end = [0u64; 1];
            self.backend
                .fetch_timer_results(slot.timer_end(), &mut end)
                .is_ready()
        });

        // Estimates whose slot already recycled can never be reported;
        // drop them before they block younger entries.
        self.frametime
            .prune(|slot| self.slots.current_state(slot) != SlotState::QueryPendingOnGPU);

        if completed.is_empty() {
            return;
        }

        let mut writer = self.writer.lock();
        for submit in completed {
            self.serialize_submit(&mut writer, submit);
        }
    }

    fn serialize_submit(&self, writer: &mut PacketWriter, submit: TrackedSubmit) {
        let marker_count = submit
            .markers
            .iter()
            .filter(|marker| marker.slot.is_some())
            .count();

        let packet = SubmitPacket {
            global_queue_index: self.queues.index_of(submit.queue),
            wall_micros: submit.wall_micros,
            present_only: submit.present_only,
            range_count: submit.cb_outer_slots.len() as u16,
            marker_count: marker_count as u16,
        };
        writer.write_data(&packet.encode());

        let mut read_back = Vec::with_capacity(submit.cb_outer_slots.len() + marker_count);
        let mut terminal_end_timestamp = None;

        for &slot in &submit.cb_outer_slots {
            let timestamps = self.read_range_timestamps(slot);
            let range = RangeTimerPacket {
                label: "",
                timestamps: timestamps.unwrap_or_default(),
            };
            writer.write_data(&range.encode());
            self.write_stats(writer, slot);

            terminal_end_timestamp = timestamps.map(|pair| pair[1]);
            read_back.push(slot);
        }

        for marker in &submit.markers {
            let Some(slot) = marker.slot else {
                continue;
            };
            let timestamps = self.read_range_timestamps(slot);
            let range = RangeTimerPacket {
                label: &marker.label,
                timestamps: timestamps.unwrap_or_default(),
            };
            writer.write_data(&range.encode());
            self.write_stats(writer, slot);
            read_back.push(slot);
        }

        // Readback done: walk the read slots forward to the reset station
        // and queue them for the next eligible command buffer.
        if !read_back.is_empty() {
            self.slots.transition(&read_back, SlotState::QueryReadbackReady);
            self.slots.transition(&read_back, SlotState::ReadyForResetIssue);
            self.pending_resets.enqueue(&read_back);
        }

        // The reset commands this submit carried have executed; those
        // slots are fresh again.
        if !submit.reset_slots.is_empty() {
            self.slots
                .transition(&submit.reset_slots, SlotState::ReadyForQueryIssue);
        }

        if let Some(slot) = submit.terminal_slot() {
            if self.frametime.try_pop_matching(slot) {
                if let Some(end_timestamp) = terminal_end_timestamp {
                    if writer.frametime_completed(end_timestamp) {
                        // Final captured frame: markers stay off until the
                        // next capture request arms them again.
                        self.max_marker_depth.store(0, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// Reads both timestamps of a slot. `None` (with a warning) if the
    /// device claims they are not ready even though the terminal slot of
    /// the submit was.
    fn read_range_timestamps(&self, slot: Slot) -> Option<[u64; 2]> {
        let mut timestamps = [0u64; 2];
        if self
            .backend
            .fetch_timer_results(slot.timer_start(), &mut timestamps)
            .is_ready()
        {
            Some(timestamps)
        } else {
            log::warn!("timestamps of slot {} unavailable at readback", slot.index());
            None
        }
    }

    fn write_stats(&self, writer: &mut PacketWriter, slot: Slot) {
        if !self.stats_enabled {
            return;
        }
        let mut stats = [0u64; PIPELINE_STAT_COUNT];
        if !self
            .backend
            .fetch_stats_results(slot.stats_index(), &mut stats)
            .is_ready()
        {
            log::warn!("statistics of slot {} unavailable at readback", slot.index());
        }
        writer.write_data(&RangeStatsPacket { stats }.encode());
    }
}
