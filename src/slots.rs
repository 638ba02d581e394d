//! The query-slot lifecycle engine.
//!
//! A slot is the atomic unit of observation: one pair of timestamp queries
//! in the physical timer pool (indices `2i` and `2i + 1`) and, when
//! pipeline statistics are enabled, one statistics query at index `i`.
//! Slots are immortal; only their state cycles:
//!
//! `ReadyForQueryIssue` → `QueryPendingOnGPU` → `QueryReadbackReady` →
//! `ReadyForResetIssue` → `ResetPendingOnGPU` → `ReadyForQueryIssue`
//!
//! The five-state ring keeps the GPU-side reset of a slot separated from
//! the next timestamp write into it by at least one observed submit
//! completion, so no per-slot fence tracking is needed.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

/// Number of logical query slots. Generously sized: slots held by command
/// buffers that are destroyed mid-flight are permanently lost.
pub const NUM_QUERY_SLOTS: u32 = 16384;

/// Physical size of the timer query pool (a start/end pair per slot).
pub const NUM_TIMER_QUERIES: u32 = NUM_QUERY_SLOTS * 2;

/// Physical size of the pipeline-statistics query pool.
pub const NUM_STAT_QUERIES: u32 = NUM_QUERY_SLOTS;

/// Identifier of one logical query slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(u32);

impl Slot {
    pub fn index(self) -> u32 {
        self.0
    }

    /// Timer-pool index of the range-start timestamp.
    pub fn timer_start(self) -> u32 {
        self.0 * 2
    }

    /// Timer-pool index of the range-end timestamp.
    pub fn timer_end(self) -> u32 {
        self.0 * 2 + 1
    }

    /// Statistics-pool index of the slot.
    pub fn stats_index(self) -> u32 {
        self.0
    }
}

/// Position of a slot in the lifecycle ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    ReadyForQueryIssue = 0,
    QueryPendingOnGPU = 1,
    QueryReadbackReady = 2,
    ReadyForResetIssue = 3,
    ResetPendingOnGPU = 4,
}

impl SlotState {
    /// The state a slot must be in before transitioning into `self`.
    fn expected_prior(self) -> SlotState {
        match self {
            SlotState::ReadyForQueryIssue => SlotState::ResetPendingOnGPU,
            SlotState::QueryPendingOnGPU => SlotState::ReadyForQueryIssue,
            SlotState::QueryReadbackReady => SlotState::QueryPendingOnGPU,
            SlotState::ReadyForResetIssue => SlotState::QueryReadbackReady,
            SlotState::ResetPendingOnGPU => SlotState::ReadyForResetIssue,
        }
    }

    fn from_u8(raw: u8) -> SlotState {
        match raw {
            0 => SlotState::ReadyForQueryIssue,
            1 => SlotState::QueryPendingOnGPU,
            2 => SlotState::QueryReadbackReady,
            3 => SlotState::ReadyForResetIssue,
            _ => SlotState::ResetPendingOnGPU,
        }
    }
}

struct Cursor {
    next_free_index: u32,
    free_slots: u32,
    active_slots: u32,
}

/// Owner of all slot state. Every other component holds bare [`Slot`]
/// identifiers and returns them here through explicit transitions.
///
/// Mutations are serialized by one mutex; the states themselves are
/// atomics so that [`QuerySlotManager::current_state`] stays lock-free
/// (it is an advisory read and allowed to race).
pub struct QuerySlotManager {
    states: Box<[AtomicU8]>,
    cursor: Mutex<Cursor>,
}

impl Default for QuerySlotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySlotManager {
    pub fn new() -> Self {
        Self {
            states: (0..NUM_QUERY_SLOTS)
                .map(|_| AtomicU8::new(SlotState::ReadyForQueryIssue as u8))
                .collect(),
            cursor: Mutex::new(Cursor {
                next_free_index: 0,
                free_slots: NUM_QUERY_SLOTS,
                active_slots: 0,
            }),
        }
    }

    /// Claims the first free slot at or after the cursor, scanning
    /// circularly. `None` means every slot is somewhere in flight; callers
    /// degrade to no tracking for that range.
    pub fn acquire(&self) -> Option<Slot> {
        let mut cursor = self.cursor.lock();

        let start = cursor.next_free_index;
        let mut scanner = start;
        loop {
            let state = &self.states[scanner as usize];
            if state.load(Ordering::Relaxed) == SlotState::ReadyForQueryIssue as u8 {
                state.store(SlotState::QueryPendingOnGPU as u8, Ordering::Relaxed);
                cursor.next_free_index = (scanner + 1) % NUM_QUERY_SLOTS;
                cursor.free_slots -= 1;
                cursor.active_slots += 1;
                return Some(Slot(scanner));
            }
            scanner = (scanner + 1) % NUM_QUERY_SLOTS;
            if scanner == start {
                return None;
            }
        }
    }

    /// Bulk transition along the lifecycle ring. The required prior state
    /// is implied by `new_state`; an out-of-order transition is a
    /// programmer error (asserted in debug builds, forced in release).
    pub fn transition(&self, slots: &[Slot], new_state: SlotState) {
        let expected = new_state.expected_prior();

        let mut cursor = self.cursor.lock();
        for slot in slots {
            let state = &self.states[slot.0 as usize];
            let current = SlotState::from_u8(state.load(Ordering::Relaxed));
            debug_assert_eq!(
                current, expected,
                "slot {} transitioned to {new_state:?} from {current:?}",
                slot.0
            );
            state.store(new_state as u8, Ordering::Relaxed);

            if new_state == SlotState::ReadyForQueryIssue {
                cursor.free_slots += 1;
                cursor.active_slots -= 1;
            } else if current == SlotState::ReadyForQueryIssue {
                // Force-transitioned out of the free pool in release.
                cursor.free_slots -= 1;
                cursor.active_slots += 1;
            }
        }
    }

    /// Backs slots out of a recording that never reached the GPU. Legal
    /// forms: `QueryPendingOnGPU → ReadyForQueryIssue` (the recording was
    /// abandoned) and `ResetPendingOnGPU → ReadyForResetIssue` (the reset
    /// carrier was abandoned).
    pub fn rollback(&self, slots: &[Slot], rollback_state: SlotState) {
        let expected = match rollback_state {
            SlotState::ReadyForQueryIssue => SlotState::QueryPendingOnGPU,
            SlotState::ReadyForResetIssue => SlotState::ResetPendingOnGPU,
            _ => {
                debug_assert!(false, "invalid slot rollback target {rollback_state:?}");
                return;
            }
        };

        let mut cursor = self.cursor.lock();
        for slot in slots {
            let state = &self.states[slot.0 as usize];
            let current = SlotState::from_u8(state.load(Ordering::Relaxed));
            debug_assert_eq!(
                current, expected,
                "slot {} rolled back to {rollback_state:?} from {current:?}",
                slot.0
            );
            state.store(rollback_state as u8, Ordering::Relaxed);

            if rollback_state == SlotState::ReadyForQueryIssue {
                cursor.free_slots += 1;
                cursor.active_slots -= 1;
            }
        }
    }

    /// Advisory read. Racy with concurrent transitions, but sufficient for
    /// the "has this slot been recycled yet?" check on the frametime path.
    pub fn current_state(&self, slot: Slot) -> SlotState {
        SlotState::from_u8(self.states[slot.0 as usize].load(Ordering::Relaxed))
    }

    pub fn free_slots(&self) -> u32 {
        self.cursor.lock().free_slots
    }

    pub fn active_slots(&self) -> u32 {
        self.cursor.lock().active_slots
    }
}

/// Slots waiting for their GPU-side reset to be encoded into an eligible
/// command buffer, plus the atomic flag used to elect exactly one encoder.
#[derive(Default)]
pub struct PendingResets {
    needed: AtomicBool,
    slots: Mutex<Vec<Slot>>,
}

impl PendingResets {
    /// Queues slots for a future reset encoding and arms the flag.
    pub fn enqueue(&self, slots: &[Slot]) {
        if slots.is_empty() {
            return;
        }
        self.slots.lock().extend_from_slice(slots);
        self.needed.store(true, Ordering::Release);
    }

    /// Attempts to claim the whole pending batch. The compare-and-swap on
    /// the armed flag guarantees that concurrent callers cannot both adopt
    /// it: exactly one command buffer encodes a given batch.
    pub fn try_claim(&self) -> Option<Vec<Slot>> {
        if self
            .needed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        let claimed = std::mem::take(&mut *self.slots.lock());
        if claimed.is_empty() {
            None
        } else {
            Some(claimed)
        }
    }

    pub fn is_armed(&self) -> bool {
        self.needed.load(Ordering::Acquire)
    }
}
