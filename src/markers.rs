//! Nested debug-marker ranges of one command buffer.
//!
//! The stack must shadow the application's begin/end nesting exactly, even
//! past the depth cap or when slot acquisition fails: those begins push a
//! placeholder so the matching end still finds a frame to pop.

use crate::slots::Slot;

/// One labeled marker range. `slot: None` is a depth-only placeholder.
#[derive(Debug, Clone)]
pub struct MarkerRange {
    pub label: String,
    pub slot: Option<Slot>,
}

/// Open and closed marker ranges recorded into one command buffer.
///
/// The depth cap is snapshotted when the command buffer begins recording;
/// a live cap change (from a capture request) only affects command buffers
/// begun afterwards, which keeps every individual stack balanced.
#[derive(Debug)]
pub struct MarkerStack {
    depth_cap: u32,
    ranges: Vec<MarkerRange>,
    open: Vec<usize>,
}

impl MarkerStack {
    pub fn new(depth_cap: u32) -> Self {
        Self {
            depth_cap,
            ranges: Vec::new(),
            open: Vec::new(),
        }
    }

    pub fn depth_cap(&self) -> u32 {
        self.depth_cap
    }

    /// Current nesting depth (open frames).
    pub fn depth(&self) -> u32 {
        self.open.len() as u32
    }

    /// Pushes a begun marker. Placeholders pass `slot = None`.
    pub fn push(&mut self, label: String, slot: Option<Slot>) {
        self.open.push(self.ranges.len());
        self.ranges.push(MarkerRange { label, slot });
    }

    /// Pops the innermost open frame, returning its slot binding.
    /// `None` when the application ends a marker it never began.
    pub fn pop(&mut self) -> Option<Option<Slot>> {
        let index = self.open.pop()?;
        Some(self.ranges[index].slot)
    }

    /// Closes every still-open frame (innermost first), returning the real
    /// slots that still need their end timestamp written.
    pub fn flush_open(&mut self) -> Vec<Slot> {
        let mut pending_ends = Vec::new();
        while let Some(index) = self.open.pop() {
            if let Some(slot) = self.ranges[index].slot {
                pending_ends.push(slot);
            }
        }
        pending_ends
    }

    /// Moves all closed markers with a real slot out of the stack, in the
    /// order they were begun. Placeholders are discarded.
    pub fn drain_closed(&mut self) -> Vec<MarkerRange> {
        self.open.clear();
        std::mem::take(&mut self.ranges)
            .into_iter()
            .filter(|range| range.slot.is_some())
            .collect()
    }

    /// Abandons the stack, returning every real slot it held (open or
    /// closed) so the caller can roll them back.
    pub fn take_all_slots(&mut self) -> Vec<Slot> {
        self.open.clear();
        std::mem::take(&mut self.ranges)
            .into_iter()
            .filter_map(|range| range.slot)
            .collect()
    }
}
