use anyhow::Result;

use crate::mshr::entry::EntryId;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemCmd {
    Read,
    Write,
}

/// Launches the backing fill for an entry: (command, block address, block size, entry, now).
/// Returns the estimated latency in cycles.
pub type MemAccessFn = Box<dyn FnMut(MemCmd, u64, u32, EntryId, Cycle) -> Cycle>;

/// Cache write-back side of a completed fill. Hit/miss/replacement policy stays with the
/// implementor.
pub trait FillTarget {
    fn write_block(&mut self, block_addr: u64, data: &[u8], now: Cycle) -> Result<()>;
}

/// Wakes up a consumer that was merged into a completed entry.
pub trait CompletionSink<R> {
    fn mark_complete(&mut self, requester: R, now: Cycle);
}

impl<R, F> CompletionSink<R> for F
where
    F: FnMut(R, Cycle),
{
    fn mark_complete(&mut self, requester: R, now: Cycle) {
        self(requester, now)
    }
}
