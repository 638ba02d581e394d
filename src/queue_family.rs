//! Queue-family classification.
//!
//! Built once from the platform-reported queue-family array. Decides which
//! families may record timestamps at all, and which may carry the GPU-side
//! query-pool reset command.

use bitflags::bitflags;

bitflags! {
    /// Capability flags of a queue family, as reported by the host API.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const SPARSE_BINDING = 1 << 3;
    }
}

/// Per-family properties the tap cares about.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyProperties {
    pub flags: QueueFlags,
    /// 0 means the family cannot write timestamps.
    pub timestamp_valid_bits: u32,
}

/// Classification of all queue families of the device.
#[derive(Debug, Default)]
pub struct QueueFamilyInfo {
    families: Vec<QueueFamilyProperties>,
}

impl QueueFamilyInfo {
    pub fn new(families: Vec<QueueFamilyProperties>) -> Self {
        Self { families }
    }

    /// Raw capability flags, empty for an out-of-range index.
    pub fn flags(&self, family_index: u32) -> QueueFlags {
        match self.families.get(family_index as usize) {
            Some(props) => props.flags,
            None => {
                debug_assert!(false, "queue family index {family_index} out of range");
                QueueFlags::empty()
            }
        }
    }

    /// Whether queues of this family can write timestamps.
    pub fn supports_timestamps(&self, family_index: u32) -> bool {
        self.families
            .get(family_index as usize)
            .is_some_and(|props| props.timestamp_valid_bits > 0)
    }

    /// Whether the query-pool reset command may be submitted from this
    /// family (graphics or compute only).
    pub fn supports_reset_submission(&self, family_index: u32) -> bool {
        self.flags(family_index)
            .intersects(QueueFlags::GRAPHICS | QueueFlags::COMPUTE)
    }
}
