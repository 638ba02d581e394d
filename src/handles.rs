//! Opaque handles for the host-API objects the tap observes.
//!
//! The tap never dereferences these; they are map keys, mirroring the
//! non-dispatchable handle model of the host graphics API.

/// Handle of an application command pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandPool(pub u64);

/// Handle of an application command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBuffer(pub u64);

/// Handle of an application device queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Queue(pub u64);
