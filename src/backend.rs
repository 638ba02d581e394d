//! The seam between the tap and the host graphics API.
//!
//! The layer glue that owns the dispatch table implements [`QueryBackend`]
//! on top of the real device; tests implement it with a mock. The trait is
//! deliberately restricted to the handful of calls the tap is allowed to
//! make on its own behalf: timestamp writes, statistics query begin/end,
//! query-pool range resets, non-blocking result fetches, and the one-time
//! setup submission used to clear both pools at device creation.

use crate::handles::CommandBuffer;

/// Number of counters in a pipeline-statistics query result.
pub const PIPELINE_STAT_COUNT: usize = 11;

/// Pipeline stage a timestamp write is ordered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    TopOfPipe,
    BottomOfPipe,
}

/// Outcome of a non-blocking query-pool result fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPoll {
    /// All requested queries have results; the output slice is filled.
    Ready,
    /// At least one requested query has not completed on the GPU yet.
    NotReady,
}

impl QueryPoll {
    #[inline]
    pub fn is_ready(self) -> bool {
        matches!(self, QueryPoll::Ready)
    }
}

/// Device operations the tap performs through the layer's bypass dispatch.
///
/// All recording methods encode into an application (or setup) command
/// buffer; the fetch methods read back from the physical query pools the
/// backend owns. Implementations must be callable from arbitrary
/// application threads.
pub trait QueryBackend: Send + Sync {
    /// Encode a timestamp write into the timer pool at `query_index`.
    fn write_timestamp(&self, cb: CommandBuffer, stage: PipelineStage, query_index: u32);

    /// Encode the start of the pipeline-statistics query at `slot_index`.
    fn begin_stats_query(&self, cb: CommandBuffer, slot_index: u32);

    /// Encode the end of the pipeline-statistics query at `slot_index`.
    fn end_stats_query(&self, cb: CommandBuffer, slot_index: u32);

    /// Encode a reset of `query_count` timer queries starting at `first_query`.
    fn reset_timer_queries(&self, cb: CommandBuffer, first_query: u32, query_count: u32);

    /// Encode a reset of `query_count` statistics queries starting at `first_query`.
    fn reset_stats_queries(&self, cb: CommandBuffer, first_query: u32, query_count: u32);

    /// Non-blocking 64-bit fetch of `out.len()` timer queries starting at
    /// `first_query` (stride 8).
    fn fetch_timer_results(&self, first_query: u32, out: &mut [u64]) -> QueryPoll;

    /// Non-blocking fetch of the statistics counters for `slot_index`.
    fn fetch_stats_results(&self, slot_index: u32, out: &mut [u64; PIPELINE_STAT_COUNT]) -> QueryPoll;

    /// Allocate and begin the one-shot command buffer used to clear both
    /// query pools at device creation. `None` disables the setup pass.
    fn begin_setup_commands(&self) -> Option<CommandBuffer>;

    /// End and submit the setup command buffer with a fence. Returns false
    /// if the submission could not be made.
    fn submit_setup_commands(&self, cb: CommandBuffer) -> bool;

    /// Poll the setup fence. Only meaningful after a successful
    /// [`QueryBackend::submit_setup_commands`].
    fn setup_fence_signaled(&self) -> bool;
}
