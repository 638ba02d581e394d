//! Pool ↔ command-buffer membership tracking.
//!
//! Two independent instances exist on the engine: one filtered to pools
//! whose queue family may submit query-pool resets, one filtered to pools
//! whose family may record timestamps. Membership is what lets pool-level
//! events (reset, destroy) cascade onto every command buffer the pool owns.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::handles::{CommandBuffer, CommandPool};

#[derive(Default)]
struct Membership {
    pools: HashSet<CommandPool>,
    command_buffers: HashSet<CommandBuffer>,
    pool_to_buffers: HashMap<CommandPool, HashSet<CommandBuffer>>,
}

/// Serialized set of tracked pools and their command buffers.
#[derive(Default)]
pub struct CommandPoolTracker {
    state: Mutex<Membership>,
}

impl CommandPoolTracker {
    pub fn add_pool(&self, pool: CommandPool) {
        self.state.lock().pools.insert(pool);
    }

    /// Drops the pool and every command buffer associated with it.
    pub fn remove_pool(&self, pool: CommandPool) {
        let mut state = self.state.lock();
        if let Some(buffers) = state.pool_to_buffers.remove(&pool) {
            for cb in &buffers {
                state.command_buffers.remove(cb);
            }
        }
        state.pools.remove(&pool);
    }

    /// Command buffers allocated from an untracked pool are silently
    /// ignored; the pool's queue family did not qualify.
    pub fn add_command_buffers(&self, pool: CommandPool, handles: &[CommandBuffer]) {
        let mut state = self.state.lock();
        if !state.pools.contains(&pool) {
            return;
        }
        for &cb in handles {
            state.command_buffers.insert(cb);
            state.pool_to_buffers.entry(pool).or_default().insert(cb);
        }
    }

    pub fn remove_command_buffers(&self, pool: CommandPool, handles: &[CommandBuffer]) {
        let mut state = self.state.lock();
        for &cb in handles {
            state.command_buffers.remove(&cb);
        }
        if let Some(buffers) = state.pool_to_buffers.get_mut(&pool) {
            for cb in handles {
                buffers.remove(cb);
            }
        }
    }

    pub fn is_pool_tracked(&self, pool: CommandPool) -> bool {
        self.state.lock().pools.contains(&pool)
    }

    pub fn is_tracked(&self, cb: CommandBuffer) -> bool {
        self.state.lock().command_buffers.contains(&cb)
    }

    /// Snapshot of the command buffers currently associated with `pool`.
    pub fn command_buffers_in(&self, pool: CommandPool) -> Vec<CommandBuffer> {
        self.state
            .lock()
            .pool_to_buffers
            .get(&pool)
            .map(|buffers| buffers.iter().copied().collect())
            .unwrap_or_default()
    }
}
