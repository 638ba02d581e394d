//! Per-command-buffer state accumulated while recording.
//!
//! Three independent maps, each behind its own lock so the hot record path
//! of one thread never contends with another thread's marker traffic.
//! Entries hold slot identifiers only; all slot state lives in the
//! [`QuerySlotManager`](crate::slots::QuerySlotManager).
//!
//! Marker state is handed out as an `Arc` so the map lock is only held for
//! the lookup itself. Recording into one command buffer is externally
//! synchronized by the host API, so the per-stack lock is uncontended; it
//! exists to keep the submit-time move safe against a racing free.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::handles::CommandBuffer;
use crate::markers::MarkerStack;
use crate::slots::Slot;

#[derive(Default)]
pub struct RecordingTracker {
    outer_slots: Mutex<HashMap<CommandBuffer, Slot>>,
    reset_slots: Mutex<HashMap<CommandBuffer, Vec<Slot>>>,
    markers: Mutex<HashMap<CommandBuffer, Arc<Mutex<MarkerStack>>>>,
}

impl RecordingTracker {
    /// Binds the slot whose timestamps bracket the whole command buffer.
    pub fn bind_outer(&self, cb: CommandBuffer, slot: Slot) {
        self.outer_slots.lock().insert(cb, slot);
    }

    pub fn outer(&self, cb: CommandBuffer) -> Option<Slot> {
        self.outer_slots.lock().get(&cb).copied()
    }

    /// Moves the outer slot out; the command buffer is no longer tracked.
    pub fn take_outer(&self, cb: CommandBuffer) -> Option<Slot> {
        self.outer_slots.lock().remove(&cb)
    }

    /// Records that `cb` carries the reset commands for these slots.
    pub fn add_reset_slots(&self, cb: CommandBuffer, slots: Vec<Slot>) {
        self.reset_slots.lock().entry(cb).or_default().extend(slots);
    }

    pub fn take_reset_slots(&self, cb: CommandBuffer) -> Vec<Slot> {
        self.reset_slots.lock().remove(&cb).unwrap_or_default()
    }

    /// Creates a fresh marker stack for a beginning command buffer,
    /// snapshotting the depth cap in effect right now.
    pub fn create_marker_state(&self, cb: CommandBuffer, depth_cap: u32) {
        self.markers
            .lock()
            .insert(cb, Arc::new(Mutex::new(MarkerStack::new(depth_cap))));
    }

    pub fn marker_state(&self, cb: CommandBuffer) -> Option<Arc<Mutex<MarkerStack>>> {
        self.markers.lock().get(&cb).cloned()
    }

    pub fn remove_marker_state(&self, cb: CommandBuffer) -> Option<Arc<Mutex<MarkerStack>>> {
        self.markers.lock().remove(&cb)
    }
}
