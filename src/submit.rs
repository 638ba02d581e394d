//! Captured submits and their per-queue ordering.
//!
//! Everything a submit needs for later attribution is moved out of the
//! recording state synchronously with the submit call: once the call
//! returns to the application, command-buffer handles may be reset or
//! reused and nothing recorded against them can be trusted.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::handles::Queue;
use crate::markers::MarkerRange;
use crate::packet::QueueInfoPacket;
use crate::slots::Slot;

/// Provenance of one host submit call (or a synthetic present).
#[derive(Debug)]
pub struct TrackedSubmit {
    pub queue: Queue,
    pub present_only: bool,
    /// Microseconds since device creation, sampled at submit.
    pub wall_micros: u64,
    /// Outer slot of each tracked command buffer, in submit order.
    pub cb_outer_slots: Vec<Slot>,
    /// Closed markers of all submitted command buffers, in record order.
    pub markers: Vec<MarkerRange>,
    /// Slots whose GPU-side reset these command buffers carry.
    pub reset_slots: Vec<Slot>,
}

impl TrackedSubmit {
    pub fn new(queue: Queue, wall_micros: u64, present_only: bool) -> Self {
        Self {
            queue,
            present_only,
            wall_micros,
            cb_outer_slots: Vec::new(),
            markers: Vec::new(),
            reset_slots: Vec::new(),
        }
    }

    /// The slot whose end timestamp gates this submit's completion.
    pub fn terminal_slot(&self) -> Option<Slot> {
        self.cb_outer_slots.last().copied()
    }
}

/// Insertion-ordered lists of in-flight submits, one per queue. Within a
/// queue the list order equals host-call order (the host externally
/// synchronizes each queue handle).
#[derive(Default)]
pub struct SubmitTracker {
    queues: Mutex<HashMap<Queue, VecDeque<TrackedSubmit>>>,
}

impl SubmitTracker {
    pub fn append(&self, submit: TrackedSubmit) {
        self.queues
            .lock()
            .entry(submit.queue)
            .or_default()
            .push_back(submit);
    }

    /// Pops completed submits off every queue head, in insertion order,
    /// stopping each queue at its first incomplete entry. A submit with no
    /// tracked command buffers is trivially complete.
    pub fn drain_completed(
        &self,
        mut is_complete: impl FnMut(&TrackedSubmit) -> bool,
    ) -> Vec<TrackedSubmit> {
        let mut queues = self.queues.lock();
        let mut completed = Vec::new();
        for list in queues.values_mut() {
            while let Some(head) = list.front() {
                if head.terminal_slot().is_some() && !is_complete(head) {
                    break;
                }
                completed.extend(list.pop_front());
            }
        }
        completed
    }

    pub fn pending_count(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}

/// Global queue numbering and the cached announcement packets a capture
/// connection replays.
#[derive(Default)]
pub struct QueueRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    indices: HashMap<Queue, u32>,
    info_cache: Vec<QueueInfoPacket>,
}

impl QueueRegistry {
    /// Registers a queue seen through `get_device_queue`. Returns the
    /// announcement packet to emit the first time only.
    pub fn observe(
        &self,
        queue: Queue,
        family_flags: u32,
        queue_index: u32,
    ) -> Option<QueueInfoPacket> {
        let mut state = self.state.lock();
        if state.indices.contains_key(&queue) {
            return None;
        }

        let global_queue_index = state.indices.len() as u32;
        state.indices.insert(queue, global_queue_index);

        let packet = QueueInfoPacket {
            queue_family_flags: family_flags,
            queue_index,
            global_queue_index,
            handle: queue.0,
        };
        state.info_cache.push(packet);
        Some(packet)
    }

    /// Global index of a queue, assigning one if the queue was never
    /// retrieved through `get_device_queue` (no announcement is possible
    /// then; its family flags are unknown).
    pub fn index_of(&self, queue: Queue) -> u32 {
        let mut state = self.state.lock();
        if let Some(&index) = state.indices.get(&queue) {
            return index;
        }
        let index = state.indices.len() as u32;
        state.indices.insert(queue, index);
        index
    }

    pub fn cached_info(&self) -> Vec<QueueInfoPacket> {
        self.state.lock().info_cache.clone()
    }
}

/// Correlates presents with the last tracked submit on their queue to
/// estimate frametimes for the HUD.
///
/// The estimate is advisory: an entry whose slot recycled before the
/// present's completion pass is dropped, never reported, which is why the
/// consumer re-checks slot state before trusting the head.
#[derive(Default)]
pub struct FrametimeBridge {
    state: Mutex<FrametimeState>,
}

#[derive(Default)]
struct FrametimeState {
    final_slot_per_queue: HashMap<Queue, Slot>,
    estimates: VecDeque<Slot>,
}

impl FrametimeBridge {
    /// Remembers the terminal slot of the latest tracked submit on `queue`.
    pub fn note_submit(&self, queue: Queue, terminal_slot: Slot) {
        self.state
            .lock()
            .final_slot_per_queue
            .insert(queue, terminal_slot);
    }

    /// Queues the presenting queue's latest terminal slot as a frametime
    /// estimate.
    pub fn note_present(&self, queue: Queue) {
        let mut state = self.state.lock();
        if let Some(&slot) = state.final_slot_per_queue.get(&queue) {
            state.estimates.push_back(slot);
        }
    }

    /// Drops leading estimates whose slot has already been recycled.
    pub fn prune(&self, is_recycled: impl Fn(Slot) -> bool) {
        let mut state = self.state.lock();
        while let Some(&head) = state.estimates.front() {
            if is_recycled(head) {
                state.estimates.pop_front();
            } else {
                break;
            }
        }
    }

    /// Pops the head estimate iff it matches `slot`.
    pub fn try_pop_matching(&self, slot: Slot) -> bool {
        let mut state = self.state.lock();
        if state.estimates.front() == Some(&slot) {
            state.estimates.pop_front();
            true
        } else {
            false
        }
    }
}
